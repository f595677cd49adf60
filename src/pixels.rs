// Pixel-buffer codec: the boundary between raw interleaved RGBA bytes (what
// a canvas or file decoder hands over) and the channels-last float tensors
// the engine works with.

use crate::tensor::Tensor;

#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl PixelBuffer {
    pub fn new(data: Vec<u8>, width: usize, height: usize) -> Result<Self, String> {
        if data.len() != width * height * 4 {
            return Err(format!(
                "pixel data length {} does not match {}x{} RGBA",
                data.len(),
                width,
                height
            ));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Byte values as a (1, height, width, 4) float tensor in 0..255.
    pub fn to_tensor(&self) -> Tensor {
        let floats = self.data.iter().map(|&b| b as f32).collect();
        Tensor::from_vec(floats, &[1, self.height, self.width, 4])
            .expect("pixel buffer dimensions are validated at construction")
    }

    /// Build a buffer from a (1, h, w, c) tensor with 1, 3 or 4 channels.
    /// Values are clamped to the byte range; single-channel input is
    /// replicated to gray, missing alpha is opaque.
    pub fn from_tensor(tensor: &Tensor) -> Result<Self, String> {
        let shape = tensor.shape();
        if shape.len() != 4 || shape[0] != 1 {
            return Err(format!(
                "expected a (1, h, w, c) tensor, got {shape:?}"
            ));
        }
        let (height, width, channels) = (shape[1], shape[2], shape[3]);
        if !matches!(channels, 1 | 3 | 4) {
            return Err(format!("unsupported channel count {channels}"));
        }
        let mut data = Vec::with_capacity(width * height * 4);
        let values = tensor.data();
        for y in 0..height {
            for x in 0..width {
                let byte = |c: usize| values[[0, y, x, c]].clamp(0.0, 255.0) as u8;
                match channels {
                    1 => {
                        let g = byte(0);
                        data.extend_from_slice(&[g, g, g, 255]);
                    }
                    3 => data.extend_from_slice(&[byte(0), byte(1), byte(2), 255]),
                    _ => data.extend_from_slice(&[byte(0), byte(1), byte(2), byte(3)]),
                }
            }
        }
        Self::new(data, width, height)
    }
}

/// Min-max normalize to the displayable 0..255 range, clamped.
pub fn deprocess(tensor: &Tensor) -> Result<Tensor, String> {
    let max = tensor.max_value()?;
    let min = tensor.min_value()?;
    let range = max - min;
    let scaled = if range > 0.0 {
        tensor.add_scalar(-min).mul_scalar(1.0 / range)
    } else {
        tensor.add_scalar(-min)
    };
    Ok(scaled.clamp(0.0, 1.0).mul_scalar(255.0).clamp(0.0, 255.0))
}

#[cfg(test)]
mod tests {
    use super::{PixelBuffer, deprocess};
    use crate::tensor::Tensor;

    #[test]
    fn test_round_trip_rgba() {
        let data: Vec<u8> = (0..2 * 2 * 4).map(|i| (i * 10) as u8).collect();
        let buffer = PixelBuffer::new(data.clone(), 2, 2).unwrap();
        let tensor = buffer.to_tensor();
        assert_eq!(tensor.shape(), &[1, 2, 2, 4]);
        let back = PixelBuffer::from_tensor(&tensor).unwrap();
        assert_eq!(back.data, data);
    }

    #[test]
    fn test_gray_replication() {
        let t = Tensor::from_vec(vec![100.0], &[1, 1, 1, 1]).unwrap();
        let buffer = PixelBuffer::from_tensor(&t).unwrap();
        assert_eq!(buffer.data, vec![100, 100, 100, 255]);
    }

    #[test]
    fn test_bad_length_rejected() {
        assert!(PixelBuffer::new(vec![0u8; 5], 2, 2).is_err());
    }

    #[test]
    fn test_deprocess_maps_extremes_to_byte_range() {
        let t = Tensor::from_vec(vec![-1.0, 0.0, 1.0], &[1, 1, 3, 1]).unwrap();
        let d = deprocess(&t).unwrap();
        let v = d.to_vec();
        assert_eq!(v[0], 0.0);
        assert_eq!(v[2], 255.0);
        assert!((v[1] - 127.5).abs() < 1e-3);
    }
}
