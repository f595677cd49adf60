// End-to-end scenarios: a toy single-conv model with known weights, driven
// through the public engine surface.

use lucent::Renderer;
use lucent::error::VisError;
use lucent::model::loader::{LayerConfig, TopologyDescriptor};
use lucent::ops::Padding;
use lucent::optvis::driver::run_to_completion;
use lucent::optvis::renderer::{InputParams, ObjectiveType};

fn toy_conv_descriptor() -> TopologyDescriptor {
    TopologyDescriptor {
        name: "one-conv".to_string(),
        layers: vec![
            LayerConfig::Input {
                name: "input".to_string(),
                height: 32,
                width: 32,
                channels: 3,
            },
            LayerConfig::Conv2D {
                name: "conv".to_string(),
                filters: 4,
                kernel: (3, 3),
                stride: (1, 1),
                padding: Padding::Same,
                activation: None,
                weights: (0..3 * 3 * 3 * 4)
                    .map(|i| ((i % 9) as f32 - 4.0) * 0.03)
                    .collect(),
                bias: vec![0.0; 4],
            },
        ],
    }
}

fn configured_renderer(decorrelate: bool) -> Renderer {
    let mut renderer = Renderer::new();
    renderer
        .set_input_params(InputParams {
            input_size: 32,
            pyramid_layers: 1,
            decorrelate,
            base_image: None,
        })
        .unwrap();
    renderer.load_model(&toy_conv_descriptor(), |_| {}).unwrap();
    renderer.set_objective_type(ObjectiveType::Channel);
    renderer.set_layer("conv").unwrap();
    renderer.set_feature_map_layer("conv").unwrap();
    renderer.set_channel(0).unwrap();
    renderer.set_learning_rate(0.05).unwrap();
    renderer
}

#[test]
fn gradient_ascent_increases_target_channel_activation() {
    let mut renderer = configured_renderer(false);
    let (mean_before, _) = renderer.activation_stats(Some(0)).unwrap();

    renderer.start_optimization(50, None).unwrap();
    let steps = run_to_completion(&mut renderer).unwrap();
    assert_eq!(steps, 50);

    let (mean_after, _) = renderer.activation_stats(Some(0)).unwrap();
    assert!(
        mean_after > mean_before,
        "expected ascent: {mean_before} -> {mean_after}"
    );
}

#[test]
fn negative_objective_inverts_the_direction() {
    // Ascending: the channel mean goes up.
    let mut ascending = configured_renderer(false);
    let (up_before, _) = ascending.activation_stats(Some(0)).unwrap();
    ascending.start_optimization(30, None).unwrap();
    run_to_completion(&mut ascending).unwrap();
    let (up_after, _) = ascending.activation_stats(Some(0)).unwrap();
    assert!(up_after > up_before, "expected rise: {up_before} -> {up_after}");

    // Inverted: the channel mean must not rise.
    let mut descending = configured_renderer(false);
    descending.set_negative(true).unwrap();
    let (down_before, _) = descending.activation_stats(Some(0)).unwrap();
    descending.start_optimization(30, None).unwrap();
    run_to_completion(&mut descending).unwrap();
    let (down_after, _) = descending.activation_stats(Some(0)).unwrap();
    assert!(
        down_after <= down_before + 1e-4,
        "expected non-increase: {down_before} -> {down_after}"
    );
}

#[test]
fn stale_channel_index_clamps_instead_of_failing() {
    let mut renderer = configured_renderer(false);
    renderer.set_channel(999).unwrap();
    renderer.start_optimization(3, None).unwrap();
    let steps = run_to_completion(&mut renderer).unwrap();
    assert_eq!(steps, 3);
}

#[test]
fn default_neuron_is_the_center_of_even_maps() {
    let renderer = configured_renderer(false);
    // 32x32 'same' conv output: both axes round to floor(32/2) = 16,
    // independent of query order.
    let (x, y) = renderer.neuron();
    assert_eq!((x, y), (16, 16));
    let (y2, x2) = (renderer.neuron().1, renderer.neuron().0);
    assert_eq!((x2, y2), (16, 16));
}

#[test]
fn optimization_works_in_decorrelated_space_too() {
    let mut renderer = configured_renderer(true);
    let (mean_before, _) = renderer.activation_stats(Some(0)).unwrap();
    renderer.start_optimization(40, None).unwrap();
    run_to_completion(&mut renderer).unwrap();
    let (mean_after, _) = renderer.activation_stats(Some(0)).unwrap();
    assert!(
        mean_after > mean_before,
        "expected ascent in decorrelated space: {mean_before} -> {mean_after}"
    );
}

#[test]
fn state_guard_reports_invalid_state_mid_run() {
    let mut renderer = configured_renderer(false);
    renderer.start_optimization(5, None).unwrap();
    assert!(renderer.is_optimizing());
    assert!(matches!(
        renderer.set_layer("conv"),
        Err(VisError::InvalidState(_))
    ));
    renderer.stop_optimization(None);
    renderer.tick().unwrap();
    assert!(!renderer.is_optimizing());
}

#[test]
fn multi_level_pyramid_run_with_level_weights() {
    let mut renderer = Renderer::new();
    renderer
        .set_input_params(InputParams {
            input_size: 32,
            pyramid_layers: 4,
            decorrelate: true,
            base_image: None,
        })
        .unwrap();
    renderer.load_model(&toy_conv_descriptor(), |_| {}).unwrap();
    renderer.set_layer("conv").unwrap();
    renderer.set_feature_map_layer("conv").unwrap();
    renderer.set_class_frequency_level_weights(0.5);
    assert_eq!(renderer.pyr_layer_weights(), &[0.0, 0.0, 1.0, 1.0]);

    renderer.start_optimization(10, None).unwrap();
    let steps = run_to_completion(&mut renderer).unwrap();
    assert_eq!(steps, 10);
}
