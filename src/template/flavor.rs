//! Flavor rendering
//!
//! A flavor is a directory under the template root holding the deployment
//! template, its parameters, a helper script and the master/node cloud-config
//! scripts. Rendering a flavor compiles both scripts into template
//! expressions, binds them into the deployment template, and materializes the
//! parameters and helper script from the run's [`TemplateArguments`].

use std::path::{Path, PathBuf};

use tracing::debug;

use super::arguments::{ScriptBindings, TemplateArguments};
use super::compiler::ExpressionCompiler;
use super::engine::TemplateMaterializer;
use super::error::TemplateError;
use super::Document;

/// Deployment template, bound to [`ScriptBindings`]
pub const DEPLOY_TEMPLATE: &str = "cluster-deploy.in.json";
/// Parameters template, bound to [`TemplateArguments`]
pub const PARAMETERS_TEMPLATE: &str = "cluster-parameters.in.json";
/// Helper script template, bound to [`TemplateArguments`]
pub const UTIL_TEMPLATE: &str = "util.in.sh";
/// Master cloud-config script
pub const MASTER_SCRIPT: &str = "master-cloudconfig.in.yml";
/// Node cloud-config script
pub const NODE_SCRIPT: &str = "node-cloudconfig.in.yml";

/// The three artifacts a flavor renders to
#[derive(Clone, Debug)]
pub struct RenderedFlavor {
    /// Deployment template document
    pub template: Document,
    /// Parameters document
    pub parameters: Document,
    /// Helper script, saved verbatim
    pub util_script: String,
}

/// Renders one flavor directory
pub struct FlavorRenderer {
    flavor_dir: PathBuf,
    compiler: ExpressionCompiler,
    materializer: TemplateMaterializer,
}

impl FlavorRenderer {
    /// Renderer for `<template_root>/<flavor>`
    pub fn new(template_root: impl AsRef<Path>, flavor: &str) -> Self {
        Self {
            flavor_dir: template_root.as_ref().join(flavor),
            compiler: ExpressionCompiler::default(),
            materializer: TemplateMaterializer::new(),
        }
    }

    /// Directory the flavor's files are read from
    pub fn flavor_dir(&self) -> &Path {
        &self.flavor_dir
    }

    /// Compile the scripts and materialize all three artifacts
    pub fn render(&self, args: &TemplateArguments) -> Result<RenderedFlavor, TemplateError> {
        let scripts = ScriptBindings {
            master_script: self.compiler.compile_file(&self.path(MASTER_SCRIPT))?,
            node_script: self.compiler.compile_file(&self.path(NODE_SCRIPT))?,
        };
        debug!(
            flavor_dir = %self.flavor_dir.display(),
            master_len = scripts.master_script.len(),
            node_len = scripts.node_script.len(),
            "compiled cloud-config scripts"
        );

        let template = self
            .materializer
            .materialize_file(&self.path(DEPLOY_TEMPLATE), &scripts)?;
        let parameters = self
            .materializer
            .materialize_file(&self.path(PARAMETERS_TEMPLATE), args)?;
        let util_script = self
            .materializer
            .render_file(&self.path(UTIL_TEMPLATE), args)?;

        Ok(RenderedFlavor {
            template,
            parameters,
            util_script,
        })
    }

    fn path(&self, file: &str) -> PathBuf {
        self.flavor_dir.join(file)
    }
}
