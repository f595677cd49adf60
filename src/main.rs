// Headless demo: build a small random-weight CNN through the loader, run a
// channel visualization to completion and log the loss trajectory. A real
// host would drive `Renderer::tick` from its frame scheduler instead of the
// blocking loop below.

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

use log::info;
use lucent::Renderer;
use lucent::error::VisError;
use lucent::model::init;
use lucent::model::loader::{LayerConfig, TopologyDescriptor};
use lucent::model::Activation;
use lucent::ops::Padding;
use lucent::optvis::renderer::{InputParams, ObjectiveType, TickOutcome};

fn demo_topology() -> TopologyDescriptor {
    TopologyDescriptor {
        name: "demo-cnn".to_string(),
        layers: vec![
            LayerConfig::Input {
                name: "input".to_string(),
                height: 32,
                width: 32,
                channels: 3,
            },
            LayerConfig::Conv2D {
                name: "conv1".to_string(),
                filters: 8,
                kernel: (3, 3),
                stride: (1, 1),
                padding: Padding::Same,
                activation: Some(Activation::Relu),
                weights: init::kaiming_normal(3 * 3 * 3, 3 * 3 * 3 * 8),
                bias: vec![0.0; 8],
            },
            LayerConfig::MaxPool2D {
                name: "pool1".to_string(),
                pool: (2, 2),
                stride: (2, 2),
            },
            LayerConfig::Conv2D {
                name: "conv2".to_string(),
                filters: 16,
                kernel: (3, 3),
                stride: (1, 1),
                padding: Padding::Same,
                activation: Some(Activation::Relu),
                weights: init::kaiming_normal(3 * 3 * 8, 3 * 3 * 8 * 16),
                bias: vec![0.0; 16],
            },
            LayerConfig::MaxPool2D {
                name: "pool2".to_string(),
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
                weights: init::xavier_uniform(8 * 8 * 16, 10, 8 * 8 * 16 * 10),
                bias: vec![0.0; 10],
            },
            LayerConfig::Softmax {
                name: "predictions".to_string(),
            },
        ],
    }
}

fn main() -> Result<(), VisError> {
    env_logger::init();

    let mut renderer = Renderer::new();
    renderer.load_model(&demo_topology(), |progress| {
        info!("loading model: {:.0}%", progress * 100.0);
    })?;
    info!("layers: {:?}", renderer.sorted_layer_list()?);

    renderer.set_input_params(InputParams {
        input_size: 64,
        pyramid_layers: 4,
        decorrelate: true,
        base_image: None,
    })?;
    renderer.set_objective_type(ObjectiveType::Channel);
    renderer.set_layer("conv2")?;
    renderer.set_feature_map_layer("conv2")?;
    renderer.set_channel(3)?;
    renderer.set_jitter(4)?;
    renderer.set_learning_rate(0.05)?;

    renderer.start_optimization(128, None)?;
    loop {
        match renderer.tick()? {
            TickOutcome::Stepped { iteration, loss } => {
                if iteration % 16 == 0 {
                    info!("iteration {iteration}: loss {loss:.5}");
                }
            }
            TickOutcome::Finished | TickOutcome::Idle => break,
        }
    }

    let (mean, variance) = renderer.activation_stats(Some(3))?;
    info!("channel 3 activation: mean {mean:.5}, variance {variance:.5}");
    info!("predicted class: {}", renderer.class_prediction()?);
    let snapshot = renderer.current_input(None)?;
    info!("rendered input shape: {:?}", snapshot.shape);
    Ok(())
}
