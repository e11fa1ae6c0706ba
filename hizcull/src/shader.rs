//! WGSL templating: `{{include "name"}}` splices in another registered file,
//! every other `{{value}}` comes from a [`ShaderConfig`].

use std::collections::{HashMap, HashSet};

use handlebars::{Context, Handlebars, Helper, HelperDef, HelperResult, JsonValue, Output, RenderContext, RenderError};
use hizcull_types::{CLUSTER_CLIP_COUNT, CULL_WORKGROUP_SIZE};
use parking_lot::Mutex;
use rust_embed::RustEmbed;
use serde::Serialize;

/// Values every shader template can refer to.
#[derive(Debug, Clone, Serialize)]
pub struct ShaderConfig {
    pub workgroup_size: u32,
    pub cluster_clip_count: u32,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            workgroup_size: CULL_WORKGROUP_SIZE,
            cluster_clip_count: CLUSTER_CLIP_COUNT,
        }
    }
}

/// Registered WGSL sources by name.
#[derive(Default)]
pub struct ShaderPreProcessor {
    sources: HashMap<String, String>,
}

impl ShaderPreProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every file of an embedded folder as `{prefix}/{path}`.
    pub fn add_shaders_embed<T: RustEmbed>(&mut self, prefix: &str) {
        for path in T::iter() {
            let Some(file) = T::get(&path) else { continue };
            match String::from_utf8(file.data.into_owned()) {
                Ok(source) => self.add_shader(&format!("{prefix}/{path}"), &source),
                Err(_) => log::warn!("Shader {prefix}/{path} isn't utf-8, skipping it"),
            }
        }
    }

    pub fn add_shader(&mut self, name: &str, source: &str) {
        if self.sources.insert(name.to_owned(), source.to_owned()).is_some() {
            log::debug!("Shader {name} re-registered");
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.sources.get(name).map(String::as_str)
    }

    /// Renders `base`, resolving includes and `config` values.
    ///
    /// Each file is spliced in at most once per render, the base included, so
    /// shared declarations can be included from everywhere that needs them.
    pub fn render_shader<T: Serialize>(&self, base: &str, config: &T) -> Result<String, RenderError> {
        profiling::scope!("render shader");

        let source = self.get(base).ok_or_else(|| self.missing(base))?;

        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.register_helper(
            "include",
            Box::new(IncludeOnce {
                spp: self,
                seen: Mutex::new(HashSet::from([base.to_owned()])),
            }),
        );

        handlebars.render_template(source, config)
    }

    fn missing(&self, name: &str) -> RenderError {
        let mut names: Vec<_> = self.sources.keys().map(String::as_str).collect();
        names.sort_unstable();
        RenderError::new(format!("Shader \"{name}\" isn't registered, known shaders: {}", names.join(", ")))
    }
}

struct IncludeOnce<'a> {
    spp: &'a ShaderPreProcessor,
    seen: Mutex<HashSet<String>>,
}

impl HelperDef for IncludeOnce<'_> {
    fn call<'reg: 'rc, 'rc>(
        &self,
        helper: &Helper<'reg, 'rc>,
        registry: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        _rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let name = match helper.param(0).map(|param| param.value()) {
            Some(JsonValue::String(name)) => name,
            Some(_) => return Err(RenderError::new("include takes the shader name as a string")),
            None => return Err(RenderError::new("include needs a shader name")),
        };

        if !self.seen.lock().insert(name.clone()) {
            return Ok(());
        }
        let source = self.spp.get(name).ok_or_else(|| self.spp.missing(name))?;
        out.write(&registry.render_template(source, ctx.data())?)?;

        Ok(())
    }
}
