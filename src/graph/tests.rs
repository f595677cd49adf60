#[cfg(test)]
mod tests {
    use crate::graph::Graph;
    use crate::ops::Padding;
    use crate::tensor::Tensor;

    fn approx_equal(a: f32, b: f32, tolerance: f32) -> bool {
        (a - b).abs() < tolerance
    }

    #[test]
    fn test_sum_gradient_is_ones() {
        let mut graph = Graph::new();
        let a = graph
            .tensor_from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3], true)
            .unwrap();
        let loss = graph.summation(a, None).unwrap();
        graph.backward(loss).unwrap();

        let grad = graph.get_gradient(a).unwrap();
        assert_eq!(grad.shape(), &[2, 3]);
        assert!(grad.to_vec().iter().all(|&x| approx_equal(x, 1.0, 1e-6)));
    }

    #[test]
    fn test_mean_gradient_scales_by_count() {
        let mut graph = Graph::new();
        let a = graph
            .tensor_from_vec(vec![1.0, 2.0, 3.0, 4.0], &[4], true)
            .unwrap();
        let loss = graph.mean(a, None).unwrap();
        graph.backward(loss).unwrap();

        let grad = graph.get_gradient(a).unwrap();
        assert!(grad.to_vec().iter().all(|&x| approx_equal(x, 0.25, 1e-6)));
    }

    #[test]
    fn test_mul_chain_gradient() {
        // loss = sum(a * b): da = b, db = a
        let mut graph = Graph::new();
        let a = graph.tensor_from_vec(vec![2.0, 3.0], &[2], true).unwrap();
        let b = graph.tensor_from_vec(vec![5.0, 7.0], &[2], true).unwrap();
        let c = graph.mul(a, b).unwrap();
        let loss = graph.summation(c, None).unwrap();
        graph.backward(loss).unwrap();

        assert_eq!(graph.get_gradient(a).unwrap().to_vec(), vec![5.0, 7.0]);
        assert_eq!(graph.get_gradient(b).unwrap().to_vec(), vec![2.0, 3.0]);
    }

    #[test]
    fn test_broadcast_add_reduces_gradient() {
        // (2,3) + (3,) — the rhs gradient must collapse to (3,)
        let mut graph = Graph::new();
        let a = graph
            .tensor_from_vec(vec![1.0; 6], &[2, 3], true)
            .unwrap();
        let b = graph.tensor_from_vec(vec![1.0; 3], &[3], true).unwrap();
        let c = graph.add(a, b).unwrap();
        let loss = graph.summation(c, None).unwrap();
        graph.backward(loss).unwrap();

        let grad_b = graph.get_gradient(b).unwrap();
        assert_eq!(grad_b.shape(), &[3]);
        assert_eq!(grad_b.to_vec(), vec![2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_slice_gradient_is_zero_padded() {
        let mut graph = Graph::new();
        let a = graph
            .tensor_from_vec((0..16).map(|x| x as f32).collect(), &[1, 4, 4, 1], true)
            .unwrap();
        let window = graph.slice(a, &[0, 1, 1, 0], &[1, 2, 2, 1]).unwrap();
        let loss = graph.summation(window, None).unwrap();
        graph.backward(loss).unwrap();

        let grad = graph.get_gradient(a).unwrap();
        assert_eq!(grad.shape(), &[1, 4, 4, 1]);
        assert!(approx_equal(grad.data().sum(), 4.0, 1e-6));
        assert!(approx_equal(grad.data()[[0, 1, 1, 0]], 1.0, 1e-6));
        assert!(approx_equal(grad.data()[[0, 0, 0, 0]], 0.0, 1e-6));
    }

    #[test]
    fn test_matmul_transpose_b_gradient() {
        // loss = sum(a @ b^T) with a 1x2, b 1x2: da = [b], db = [a]
        let mut graph = Graph::new();
        let a = graph.tensor_from_vec(vec![2.0, 3.0], &[1, 2], true).unwrap();
        let b = graph.tensor_from_vec(vec![5.0, 7.0], &[1, 2], true).unwrap();
        let c = graph.matmul(a, b, false, true).unwrap();
        assert_eq!(graph.value(c).unwrap().shape(), &[1, 1]);
        assert!(approx_equal(
            graph.value(c).unwrap().first().unwrap(),
            31.0,
            1e-6
        ));

        let loss = graph.summation(c, None).unwrap();
        graph.backward(loss).unwrap();
        assert_eq!(graph.get_gradient(a).unwrap().to_vec(), vec![5.0, 7.0]);
        assert_eq!(graph.get_gradient(b).unwrap().to_vec(), vec![2.0, 3.0]);
    }

    #[test]
    fn test_max_global_routes_gradient_to_argmax() {
        let mut graph = Graph::new();
        let a = graph
            .tensor_from_vec(vec![1.0, 4.0, 2.0], &[3], true)
            .unwrap();
        let m = graph.max_global(a).unwrap();
        graph.backward(m).unwrap();

        assert_eq!(graph.get_gradient(a).unwrap().to_vec(), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_resize_bilinear_gradient_conserves_mass() {
        // Sum of upsampled = weighted sum of inputs, so the input gradient of
        // a sum-loss equals the per-source interpolation weight totals; their
        // grand total matches the number of output pixels.
        let mut graph = Graph::new();
        let a = graph
            .tensor_from_vec(vec![1.0, 2.0, 3.0, 4.0], &[1, 2, 2, 1], true)
            .unwrap();
        let up = graph.resize_bilinear(a, 4, 4, true).unwrap();
        let loss = graph.summation(up, None).unwrap();
        graph.backward(loss).unwrap();

        let grad = graph.get_gradient(a).unwrap();
        assert_eq!(grad.shape(), &[1, 2, 2, 1]);
        assert!(approx_equal(grad.data().sum(), 16.0, 1e-5));
    }

    #[test]
    fn test_conv2d_identity_kernel_passes_gradient_through() {
        // 1x1 kernel with weight 1 is the identity map.
        let mut graph = Graph::new();
        let x = graph
            .tensor_from_vec(vec![1.0, 2.0, 3.0, 4.0], &[1, 2, 2, 1], true)
            .unwrap();
        let w = graph.tensor_from_vec(vec![1.0], &[1, 1, 1, 1], false).unwrap();
        let b = graph.tensor_from_vec(vec![0.0], &[1], false).unwrap();
        let y = graph
            .conv2d(x, w, b, (1, 1), Padding::Valid)
            .unwrap();
        assert_eq!(graph.value(y).unwrap().to_vec(), vec![1.0, 2.0, 3.0, 4.0]);

        let loss = graph.summation(y, None).unwrap();
        graph.backward(loss).unwrap();
        assert_eq!(
            graph.get_gradient(x).unwrap().to_vec(),
            vec![1.0, 1.0, 1.0, 1.0]
        );
    }

    #[test]
    fn test_conv2d_same_padding_shape() {
        let mut graph = Graph::new();
        let x = graph
            .tensor_from_vec(vec![0.5; 25], &[1, 5, 5, 1], true)
            .unwrap();
        let w = graph
            .tensor_from_vec(vec![0.1; 9], &[3, 3, 1, 1], false)
            .unwrap();
        let b = graph.tensor_from_vec(vec![0.0], &[1], false).unwrap();
        let y = graph.conv2d(x, w, b, (1, 1), Padding::Same).unwrap();
        assert_eq!(graph.value(y).unwrap().shape(), &[1, 5, 5, 1]);
        // Interior pixels see the full 3x3 window.
        assert!(approx_equal(
            graph.value(y).unwrap().data()[[0, 2, 2, 0]],
            0.45,
            1e-5
        ));
    }

    #[test]
    fn test_max_pool_forward_and_gradient() {
        let mut graph = Graph::new();
        let x = graph
            .tensor_from_vec(
                vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 13.0, 14.0,
                    15.0, 16.0],
                &[1, 4, 4, 1],
                true,
            )
            .unwrap();
        let y = graph.max_pool2d(x, (2, 2), (2, 2)).unwrap();
        assert_eq!(graph.value(y).unwrap().to_vec(), vec![6.0, 8.0, 14.0, 16.0]);

        let loss = graph.summation(y, None).unwrap();
        graph.backward(loss).unwrap();
        let grad = graph.get_gradient(x).unwrap();
        assert!(approx_equal(grad.data()[[0, 1, 1, 0]], 1.0, 1e-6));
        assert!(approx_equal(grad.data()[[0, 0, 0, 0]], 0.0, 1e-6));
        assert!(approx_equal(grad.data().sum(), 4.0, 1e-6));
    }

    #[test]
    fn test_sigmoid_gradient_uses_cached_output() {
        let mut graph = Graph::new();
        let a = graph.tensor_from_vec(vec![0.0], &[1], true).unwrap();
        let s = graph.sigmoid(a).unwrap();
        graph.backward(s).unwrap();
        // sigma(0) = 0.5, sigma'(0) = 0.25
        assert!(approx_equal(
            graph.get_gradient(a).unwrap().first().unwrap(),
            0.25,
            1e-6
        ));
    }

    #[test]
    fn test_gradient_accumulates_on_reuse() {
        // loss = sum(a + a): gradient of a is 2
        let mut graph = Graph::new();
        let a = graph.tensor_from_vec(vec![1.0, 1.0], &[2], true).unwrap();
        let c = graph.add(a, a).unwrap();
        let loss = graph.summation(c, None).unwrap();
        graph.backward(loss).unwrap();
        assert_eq!(graph.get_gradient(a).unwrap().to_vec(), vec![2.0, 2.0]);
    }

    #[test]
    fn test_fresh_tensor_snapshot() {
        let t = Tensor::randn(&[1, 8, 8, 3], 0.01).unwrap();
        let mut graph = Graph::new();
        let id = graph.create_variable(t.clone(), true);
        assert_eq!(graph.value(id).unwrap(), &t);
        drop(graph);
        // The persistent tensor outlives the pass-scoped graph.
        assert_eq!(t.shape(), &[1, 8, 8, 3]);
    }
}
