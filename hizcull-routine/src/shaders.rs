//! Holds the sources for all shaders.

use std::borrow::Cow;

use hizcull::{format_sso, RoutineCreationError, ShaderConfig, ShaderPreProcessor};
use rust_embed::RustEmbed;
use wgpu::ShaderSource;

/// Prefix every shader of this crate is registered under.
pub const SHADER_PREFIX: &str = "hizcull-routine";

#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/shaders"]
pub struct HizcullRoutineShaderSources;

/// Preprocessor with every shader of this crate registered.
pub fn preprocessor() -> ShaderPreProcessor {
    let mut spp = ShaderPreProcessor::new();
    spp.add_shaders_embed::<HizcullRoutineShaderSources>(SHADER_PREFIX);
    spp
}

/// Renders `file` with the default config, ready for `create_shader_module`.
pub(crate) fn render_shader(spp: &ShaderPreProcessor, file: &str) -> Result<ShaderSource<'static>, RoutineCreationError> {
    let name = format_sso!("{SHADER_PREFIX}/{file}");
    let source = spp
        .render_shader(&name, &ShaderConfig::default())
        .map_err(|source| RoutineCreationError::ShaderRender { shader: name, source })?;

    Ok(ShaderSource::Wgsl(Cow::Owned(source)))
}
