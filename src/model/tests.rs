#[cfg(test)]
mod tests {
    use crate::graph::Graph;
    use crate::model::loader::{LayerConfig, TopologyDescriptor, load_model};
    use crate::model::{Activation, LayerKind, ModelBuilder};
    use crate::ops::Padding;
    use crate::tensor::Tensor;

    fn toy_descriptor() -> TopologyDescriptor {
        TopologyDescriptor {
            name: "toy".to_string(),
            layers: vec![
                LayerConfig::Input {
                    name: "input".to_string(),
                    height: 8,
                    width: 8,
                    channels: 3,
                },
                LayerConfig::Conv2D {
                    name: "conv1".to_string(),
                    filters: 4,
                    kernel: (3, 3),
                    stride: (1, 1),
                    padding: Padding::Same,
                    activation: Some(Activation::Relu),
                    weights: vec![0.05; 3 * 3 * 3 * 4],
                    bias: vec![0.0; 4],
                },
                LayerConfig::MaxPool2D {
                    name: "pool1".to_string(),
                    pool: (2, 2),
                    stride: (2, 2),
                },
                LayerConfig::Flatten {
                    name: "flatten".to_string(),
                },
                LayerConfig::Dense {
                    name: "logits".to_string(),
                    units: 10,
                    activation: None,
                    weights: vec![0.01; 4 * 4 * 4 * 10],
                    bias: vec![0.0; 10],
                },
                LayerConfig::Softmax {
                    name: "predictions".to_string(),
                },
            ],
        }
    }

    #[test]
    fn test_loader_progress_is_monotonic_and_complete() {
        let mut reports = Vec::new();
        let model = load_model(&toy_descriptor(), |p| reports.push(p)).unwrap();
        assert_eq!(model.layers().len(), 6);
        assert!(reports.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(reports.first().copied(), Some(0.0));
        assert_eq!(reports.last().copied(), Some(1.0));
    }

    #[test]
    fn test_loader_rejects_bad_weight_blob() {
        let mut desc = toy_descriptor();
        if let LayerConfig::Conv2D { weights, .. } = &mut desc.layers[1] {
            weights.truncate(5);
        }
        assert!(load_model(&desc, |_| {}).is_err());
    }

    #[test]
    fn test_output_shapes_follow_the_chain() {
        let model = load_model(&toy_descriptor(), |_| {}).unwrap();
        assert_eq!(model.output_shape("conv1", None).unwrap(), vec![1, 8, 8, 4]);
        assert_eq!(model.output_shape("pool1", None).unwrap(), vec![1, 4, 4, 4]);
        assert_eq!(model.output_shape("flatten", None).unwrap(), vec![1, 64]);
        assert_eq!(model.output_shape("logits", None).unwrap(), vec![1, 10]);
        // Shape inference at a different working resolution.
        assert_eq!(
            model.output_shape("conv1", Some((16, 16))).unwrap(),
            vec![1, 16, 16, 4]
        );
    }

    #[test]
    fn test_sorted_layer_list_orders_by_depth() {
        let model = load_model(&toy_descriptor(), |_| {}).unwrap();
        assert_eq!(
            model.sorted_layer_list(),
            vec!["input", "conv1", "pool1", "flatten", "logits", "predictions"]
        );
    }

    #[test]
    fn test_class_output_layer_skips_softmax() {
        let model = load_model(&toy_descriptor(), |_| {}).unwrap();
        assert_eq!(model.class_output_layer().unwrap(), "logits");
        assert_eq!(model.first_conv_layer(), Some("conv1"));
    }

    #[test]
    fn test_apply_with_intermediate_outputs() {
        let model = load_model(&toy_descriptor(), |_| {}).unwrap();
        let mut graph = Graph::new();
        let input = graph.create_variable(Tensor::full(&[1, 8, 8, 3], 0.5), true);
        let outs = model
            .apply(&mut graph, input, &["conv1", "predictions"])
            .unwrap();
        assert_eq!(graph.value(outs[0]).unwrap().shape(), &[1, 8, 8, 4]);
        let probs = graph.value(outs[1]).unwrap();
        assert_eq!(probs.shape(), &[1, 10]);
        let total: f32 = probs.to_vec().iter().sum();
        assert!((total - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_apply_is_fully_convolutional() {
        // The conv prefix of the model accepts any spatial input size.
        let model = load_model(&toy_descriptor(), |_| {}).unwrap();
        let mut graph = Graph::new();
        let input = graph.create_variable(Tensor::full(&[1, 12, 12, 3], 0.1), true);
        let outs = model.apply(&mut graph, input, &["pool1"]).unwrap();
        assert_eq!(graph.value(outs[0]).unwrap().shape(), &[1, 6, 6, 4]);
    }

    #[test]
    fn test_builder_rejects_orphan_and_duplicate_layers() {
        let mut builder = ModelBuilder::new("broken");
        assert!(builder.add("conv", LayerKind::Flatten).is_err());

        let mut builder = ModelBuilder::new("dup");
        builder
            .add(
                "input",
                LayerKind::Input {
                    height: 4,
                    width: 4,
                    channels: 1,
                },
            )
            .unwrap();
        builder.add("a", LayerKind::Flatten).unwrap();
        assert!(builder.add("a", LayerKind::Flatten).is_err());
    }

    #[test]
    fn test_builder_validates_conv_weight_shape() {
        let mut builder = ModelBuilder::new("badweights");
        builder
            .add(
                "input",
                LayerKind::Input {
                    height: 4,
                    width: 4,
                    channels: 1,
                },
            )
            .unwrap();
        builder
            .add(
                "conv",
                LayerKind::Conv2D {
                    filters: 2,
                    kernel: (3, 3),
                    stride: (1, 1),
                    padding: Padding::Same,
                    activation: None,
                    weights: Tensor::zeros(&[3, 3, 4, 2]), // wrong in-channels
                    bias: Tensor::zeros(&[2]),
                },
            )
            .unwrap();
        assert!(builder.build().is_err());
    }
}
