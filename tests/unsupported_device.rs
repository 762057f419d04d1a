//! Device capability probing.
//!
//! Binding-table properties are retrieved once per process, so this lives in
//! its own test binary with a backend that lacks single-element combined
//! image/sampler descriptors.

mod common;

use batch_renderer::backend::dummy::DummyBackend;
use batch_renderer::{BatchRenderer, BindingTableProperties, RendererConfig, RendererError};
use common::{init_logging, shader_set};

/// Renderer creation fails fast instead of writing a corrupt texture table
#[test]
fn test_combined_image_sampler_required() {
    init_logging();
    let mut backend = DummyBackend::with_properties(BindingTableProperties {
        combined_image_sampler_single_array: false,
        ..DummyBackend::default_properties()
    });

    let result = BatchRenderer::new(&mut backend, RendererConfig::default(), &shader_set());
    assert!(matches!(result, Err(RendererError::UnsupportedFeature(_))));
    assert_eq!(backend.live_buffer_count(), 0);
    assert_eq!(backend.live_pipeline_count(), 0);

    // Later queries reuse the cached answer
    let cached = BindingTableProperties::get().unwrap();
    assert!(!cached.combined_image_sampler_single_array);
    assert_eq!(backend.property_queries(), 1);
}
