#[cfg(test)]
mod tests {
    use crate::model::loader::{LayerConfig, TopologyDescriptor};
    use crate::model::Activation;
    use crate::ops::Padding;
    use crate::optvis::objectives::{ActivationModifications, ChannelModification};
    use crate::optvis::renderer::{
        InputParams, LoadState, ObjectiveType, Renderer, StyleLayerKind, TickOutcome,
    };
    use crate::error::VisError;
    use crate::pixels::PixelBuffer;
    use std::cell::Cell;
    use std::collections::BTreeMap;
    use std::rc::Rc;

    fn toy_descriptor() -> TopologyDescriptor {
        TopologyDescriptor {
            name: "toy".to_string(),
            layers: vec![
                LayerConfig::Input {
                    name: "input".to_string(),
                    height: 16,
                    width: 16,
                    channels: 3,
                },
                LayerConfig::Conv2D {
                    name: "conv1".to_string(),
                    filters: 4,
                    kernel: (3, 3),
                    stride: (1, 1),
                    padding: Padding::Same,
                    activation: None,
                    weights: (0..3 * 3 * 3 * 4)
                        .map(|i| ((i % 7) as f32 - 3.0) * 0.05)
                        .collect(),
                    bias: vec![0.0; 4],
                },
                LayerConfig::Conv2D {
                    name: "conv2".to_string(),
                    filters: 6,
                    kernel: (3, 3),
                    stride: (1, 1),
                    padding: Padding::Same,
                    activation: Some(Activation::Relu),
                    weights: (0..3 * 3 * 4 * 6)
                        .map(|i| ((i % 5) as f32 - 2.0) * 0.04)
                        .collect(),
                    bias: vec![0.0; 6],
                },
                LayerConfig::Flatten {
                    name: "flatten".to_string(),
                },
                LayerConfig::Dense {
                    name: "logits".to_string(),
                    units: 5,
                    activation: None,
                    weights: (0..16 * 16 * 6 * 5)
                        .map(|i| ((i % 11) as f32 - 5.0) * 0.002)
                        .collect(),
                    bias: vec![0.0; 5],
                },
                LayerConfig::Softmax {
                    name: "predictions".to_string(),
                },
            ],
        }
    }

    fn ready_renderer() -> Renderer {
        let mut renderer = Renderer::new();
        renderer
            .set_input_params(InputParams {
                input_size: 16,
                pyramid_layers: 2,
                decorrelate: true,
                base_image: None,
            })
            .unwrap();
        renderer.load_model(&toy_descriptor(), |_| {}).unwrap();
        renderer.set_jitter(2).unwrap();
        renderer
    }

    #[test]
    fn test_defaults() {
        let renderer = Renderer::new();
        assert_eq!(renderer.load_state(), LoadState::Initial);
        assert_eq!(renderer.input_params().input_size, 128);
        assert_eq!(renderer.input_params().pyramid_layers, 4);
        assert!(renderer.input_params().decorrelate);
        assert_eq!(renderer.objective_type(), ObjectiveType::Channel);
        assert_eq!(renderer.jitter(), 5);
        assert_eq!(renderer.learning_rate(), 0.05);
        assert!(!renderer.can_optimize());
    }

    #[test]
    fn test_load_model_initializes_objective_defaults() {
        let renderer = ready_renderer();
        assert_eq!(renderer.load_state(), LoadState::Loaded);
        assert_eq!(renderer.layer(), "conv1");
        assert_eq!(renderer.feature_map_layer(), "conv1");
        // 16x16 output, center rounds up on even extents.
        assert_eq!(renderer.neuron(), (8, 8));
        assert!(renderer.content_image().is_some());
        assert!(renderer.can_optimize());
    }

    #[test]
    fn test_current_input_before_compile_fails() {
        let renderer = Renderer::new();
        match renderer.current_input(None) {
            Err(VisError::InvalidState(_)) => {}
            other => panic!("expected InvalidState, got {other:?}"),
        }
    }

    #[test]
    fn test_set_layer_rejects_flat_layers() {
        let mut renderer = ready_renderer();
        match renderer.set_layer("logits") {
            Err(VisError::InvalidArgument(_)) => {}
            other => panic!("expected InvalidArgument, got {other:?}"),
        }
        match renderer.set_layer("nonexistent") {
            Err(VisError::UnknownLayer(_)) => {}
            other => panic!("expected UnknownLayer, got {other:?}"),
        }
    }

    #[test]
    fn test_set_layer_recenters_neuron_only_on_change() {
        let mut renderer = ready_renderer();
        renderer.set_neuron(1, 2).unwrap();
        // Re-applying the same layer keeps the steered neuron.
        renderer.set_layer("conv1").unwrap();
        assert_eq!(renderer.neuron(), (1, 2));
        // Switching layers recenters.
        renderer.set_layer("conv2").unwrap();
        assert_eq!(renderer.neuron(), (8, 8));
    }

    #[test]
    fn test_negative_index_setters_reject() {
        let mut renderer = ready_renderer();
        assert!(matches!(
            renderer.set_channel(-1),
            Err(VisError::InvalidArgument(_))
        ));
        assert!(matches!(
            renderer.set_neuron(-2, 0),
            Err(VisError::InvalidArgument(_))
        ));
        assert!(matches!(
            renderer.set_class(-3),
            Err(VisError::InvalidArgument(_))
        ));
        assert!(matches!(
            renderer.set_jitter(-1),
            Err(VisError::InvalidArgument(_))
        ));
        assert!(matches!(
            renderer.set_learning_rate(0.0),
            Err(VisError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_neuron_clamps_to_layer_extent() {
        let mut renderer = ready_renderer();
        renderer.set_neuron(500, 500).unwrap();
        assert_eq!(renderer.neuron(), (15, 15));
    }

    #[test]
    fn test_state_guard_while_optimizing() {
        let mut renderer = ready_renderer();
        renderer.start_optimization(4, None).unwrap();
        assert!(renderer.is_optimizing());
        assert_eq!(renderer.load_state(), LoadState::Optimizing);

        let input_params_before = renderer.input_params().clone();
        let objective_params_before = renderer.objective_params().clone();

        assert!(matches!(
            renderer.set_input_params(InputParams::default()),
            Err(VisError::InvalidState(_))
        ));
        assert!(matches!(
            renderer.set_layer("conv2"),
            Err(VisError::InvalidState(_))
        ));

        // Nothing was mutated by the rejected calls.
        assert_eq!(renderer.input_params(), &input_params_before);
        assert_eq!(renderer.objective_params(), &objective_params_before);

        renderer.stop_optimization(None);
        renderer.tick().unwrap();
        assert!(!renderer.is_optimizing());
    }

    #[test]
    fn test_steering_mid_run_does_not_reset_iterations() {
        let mut renderer = ready_renderer();
        renderer.start_optimization(6, None).unwrap();
        assert!(matches!(
            renderer.tick().unwrap(),
            TickOutcome::Stepped { iteration: 1, .. }
        ));
        renderer.set_channel(3).unwrap();
        renderer.set_negative(true).unwrap();
        match renderer.tick().unwrap() {
            TickOutcome::Stepped { iteration, .. } => assert_eq!(iteration, 2),
            other => panic!("expected a step, got {other:?}"),
        }
        renderer.stop_optimization(None);
        renderer.tick().unwrap();
    }

    #[test]
    fn test_start_is_noop_when_already_optimizing() {
        let mut renderer = ready_renderer();
        renderer.start_optimization(3, None).unwrap();
        renderer.tick().unwrap();
        // Second start is silently ignored; the counter keeps its place.
        renderer.start_optimization(100, None).unwrap();
        match renderer.tick().unwrap() {
            TickOutcome::Stepped { iteration, .. } => assert_eq!(iteration, 2),
            other => panic!("expected a step, got {other:?}"),
        }
        renderer.stop_optimization(None);
        renderer.tick().unwrap();
    }

    #[test]
    fn test_run_exhausts_and_fires_callbacks_in_order() {
        let mut renderer = ready_renderer();
        let events = Rc::new(std::cell::RefCell::new(Vec::new()));

        let iteration_events = Rc::clone(&events);
        renderer
            .start_optimization(
                2,
                Some(Box::new(move |stopped| {
                    iteration_events.borrow_mut().push(if stopped {
                        "iteration(stopped)"
                    } else {
                        "iteration"
                    });
                })),
            )
            .unwrap();

        assert!(matches!(renderer.tick().unwrap(), TickOutcome::Stepped { .. }));
        assert!(matches!(renderer.tick().unwrap(), TickOutcome::Stepped { .. }));
        assert!(matches!(renderer.tick().unwrap(), TickOutcome::Finished));
        assert!(matches!(renderer.tick().unwrap(), TickOutcome::Idle));
        assert_eq!(
            events.borrow().as_slice(),
            &["iteration", "iteration", "iteration(stopped)"]
        );
        assert!(!renderer.is_optimizing());
        assert_eq!(renderer.load_state(), LoadState::Loaded);
    }

    #[test]
    fn test_cooperative_stop_completes_in_flight_then_winds_down() {
        let mut renderer = ready_renderer();
        let stopped = Rc::new(Cell::new(false));
        renderer.start_optimization(100, None).unwrap();
        renderer.tick().unwrap();

        let stop_flag = Rc::clone(&stopped);
        renderer.stop_optimization(Some(Box::new(move || stop_flag.set(true))));
        // The stop is observed at the top of the next tick; no further step
        // runs.
        assert!(!stopped.get());
        assert!(matches!(renderer.tick().unwrap(), TickOutcome::Finished));
        assert!(stopped.get());
        assert!(!renderer.is_optimizing());
    }

    #[test]
    fn test_stop_without_active_run_fires_callback_immediately() {
        let mut renderer = ready_renderer();
        let fired = Rc::new(Cell::new(false));
        let flag = Rc::clone(&fired);
        renderer.stop_optimization(Some(Box::new(move || flag.set(true))));
        assert!(fired.get());
    }

    #[test]
    fn test_class_frequency_level_weights_sweep() {
        let mut renderer = ready_renderer();
        renderer
            .set_input_params(InputParams {
                input_size: 16,
                pyramid_layers: 4,
                decorrelate: true,
                base_image: None,
            })
            .unwrap();
        renderer.set_class_frequency_level_weights(0.5);
        // Two zero-weight coarsest levels, two full-weight finest levels.
        assert_eq!(renderer.pyr_layer_weights(), &[0.0, 0.0, 1.0, 1.0]);

        renderer.set_class_frequency_level_weights(1.0);
        assert_eq!(renderer.pyr_layer_weights(), &[1.0, 1.0, 1.0, 1.0]);

        renderer.set_class_frequency_level_weights(0.375);
        assert_eq!(renderer.pyr_layer_weights(), &[0.0, 0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_input_params_resize_adjusts_weights_and_levels() {
        let mut renderer = ready_renderer();
        renderer
            .set_input_params(InputParams {
                input_size: 16,
                pyramid_layers: 3,
                decorrelate: false,
                base_image: None,
            })
            .unwrap();
        assert_eq!(renderer.pyr_layer_weights().len(), 3);
        assert_eq!(renderer.current_input(Some(2)).unwrap().shape, vec![1, 16, 16, 3]);
        assert!(matches!(
            renderer.current_input(Some(3)),
            Err(VisError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_input_params_validation() {
        let mut renderer = ready_renderer();
        assert!(matches!(
            renderer.set_input_params(InputParams {
                input_size: 0,
                pyramid_layers: 1,
                decorrelate: true,
                base_image: None,
            }),
            Err(VisError::InvalidArgument(_))
        ));
        assert!(matches!(
            renderer.set_input_params(InputParams {
                input_size: 16,
                pyramid_layers: 0,
                decorrelate: true,
                base_image: None,
            }),
            Err(VisError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_validate_optimization_input_messages() {
        let mut renderer = ready_renderer();
        assert!(renderer.validate_optimization_input().is_none());

        renderer.set_objective_type(ObjectiveType::Style);
        let style_message = renderer.validate_optimization_input().unwrap();
        assert_eq!(style_message.title, "Can't start optimization!");
        assert_eq!(style_message.detail, "No style image supplied.");

        renderer.set_objective_type(ObjectiveType::ActAdjust);
        let adjust_message = renderer.validate_optimization_input().unwrap();
        assert_eq!(adjust_message.detail, "No activation modifications supplied.");
        assert_ne!(style_message.detail, adjust_message.detail);

        renderer.set_objective_type(ObjectiveType::Channel);
        assert!(renderer.validate_optimization_input().is_none());
    }

    #[test]
    fn test_start_with_unready_style_objective_fails() {
        let mut renderer = ready_renderer();
        renderer.set_objective_type(ObjectiveType::Style);
        assert!(matches!(
            renderer.start_optimization(4, None),
            Err(VisError::InvalidState(_))
        ));
        assert!(!renderer.is_optimizing());
    }

    #[test]
    fn test_style_image_round_trip_and_resize() {
        let mut renderer = ready_renderer();
        let buffer = PixelBuffer::new(vec![100u8; 8 * 8 * 4], 8, 8).unwrap();
        renderer.set_style_image(Some(&buffer)).unwrap();
        assert_eq!(renderer.style_image().unwrap().shape(), &[1, 16, 16, 3]);
        assert_eq!(renderer.style_image_shape(), vec![1, 16, 16, 3]);

        renderer
            .set_input_params(InputParams {
                input_size: 12,
                pyramid_layers: 2,
                decorrelate: true,
                base_image: None,
            })
            .unwrap();
        assert_eq!(renderer.style_image().unwrap().shape(), &[1, 12, 12, 3]);

        renderer.set_style_image(None).unwrap();
        assert!(renderer.style_image().is_none());
    }

    #[test]
    fn test_activation_modification_merge_defaults() {
        let mut renderer = ready_renderer();
        let mut patch = ActivationModifications::new();
        let mut channels = BTreeMap::new();
        channels.insert(
            2usize,
            ChannelModification {
                shift: 0.5,
                scale: 1.0,
                noise: 0.0,
            },
        );
        patch.insert("conv1".to_string(), channels);
        renderer.set_activation_modifications(&patch).unwrap();

        // A second patch touching a different channel merges in, keeping the
        // first one and defaulting unspecified fields.
        let mut patch2 = ActivationModifications::new();
        let mut channels2 = BTreeMap::new();
        channels2.insert(3usize, ChannelModification::default());
        patch2.insert("conv1".to_string(), channels2);
        renderer.set_activation_modifications(&patch2).unwrap();

        let mods = renderer.activation_modifications();
        let conv_mods = &mods["conv1"];
        assert_eq!(conv_mods[&2].shift, 0.5);
        assert_eq!(conv_mods[&3].scale, 1.0);
        assert_eq!(conv_mods[&3].noise, 0.0);
    }

    #[test]
    fn test_reset_input_clears_modifications_and_stores_snapshot() {
        let mut renderer = ready_renderer();
        let mut patch = ActivationModifications::new();
        patch.insert("conv1".to_string(), BTreeMap::new());
        renderer.set_activation_modifications(&patch).unwrap();
        assert!(!renderer.activation_modifications().is_empty());

        renderer.reset_input().unwrap();
        assert!(renderer.activation_modifications().is_empty());
        assert!(renderer.last_input().is_some());
    }

    #[test]
    fn test_activation_maps_shape_and_cache() {
        let mut renderer = ready_renderer();
        let maps = renderer.activation_maps().unwrap();
        // (channels, h, w, 1): each channel becomes its own image.
        assert_eq!(maps.shape(), &[4, 16, 16, 1]);
        assert_eq!(renderer.activation_shape().unwrap(), vec![1, 16, 16, 4]);

        renderer.set_feature_map_layer("conv2").unwrap();
        assert_eq!(renderer.activation_shape().unwrap(), vec![1, 16, 16, 6]);
    }

    #[test]
    fn test_current_activations_channel_clamps() {
        let mut renderer = ready_renderer();
        let one = renderer.current_activations(Some(1)).unwrap();
        assert_eq!(one.shape(), &[1, 16, 16, 1]);
        let clamped = renderer.current_activations(Some(999)).unwrap();
        assert_eq!(clamped.shape(), &[1, 16, 16, 1]);
        let (_, variance) = renderer.activation_stats(Some(0)).unwrap();
        assert!(variance >= 0.0);
    }

    #[test]
    fn test_channel_count_follows_target_layer() {
        let mut renderer = ready_renderer();
        assert_eq!(renderer.channel_count(), 4);
        renderer.set_layer("conv2").unwrap();
        assert_eq!(renderer.channel_count(), 6);
    }

    #[test]
    fn test_class_prediction_returns_valid_index() {
        let mut renderer = ready_renderer();
        let prediction = renderer.class_prediction().unwrap();
        assert!(prediction < 5);
    }

    #[test]
    fn test_steering_setters_store_previous_input() {
        let mut renderer = ready_renderer();
        renderer.set_channel(1).unwrap();
        let snapshot = renderer.last_input().unwrap();
        assert_eq!(snapshot.shape, vec![1, 16, 16, 3]);
        assert_eq!(snapshot.data.len(), 16 * 16 * 3);
    }

    #[test]
    fn test_base_image_seeding_through_engine() {
        let mut renderer = ready_renderer();
        let base = PixelBuffer::new(vec![200u8; 16 * 16 * 4], 16, 16).unwrap();
        renderer
            .set_input_params(InputParams {
                input_size: 16,
                pyramid_layers: 3,
                decorrelate: false,
                base_image: Some(base),
            })
            .unwrap();
        let snapshot = renderer.current_input(None).unwrap();
        assert_eq!(snapshot.shape, vec![1, 16, 16, 3]);
    }

    #[test]
    fn test_style_layer_selection_updates_independently() {
        let mut renderer = ready_renderer();
        renderer
            .set_style_layers(StyleLayerKind::Style, vec!["conv1".to_string()])
            .unwrap();
        renderer
            .set_style_layers(StyleLayerKind::Content, vec!["conv2".to_string()])
            .unwrap();
        assert_eq!(renderer.style_layers().style, vec!["conv1".to_string()]);
        assert_eq!(renderer.style_layers().content, vec!["conv2".to_string()]);
    }

    #[test]
    fn test_sorted_layer_list_exposed() {
        let renderer = ready_renderer();
        let layers = renderer.sorted_layer_list().unwrap();
        assert_eq!(layers.first().map(String::as_str), Some("input"));
        assert_eq!(layers.last().map(String::as_str), Some("predictions"));
    }
}
