//! Input resolution and command templating

use crate::definition::RunUnit;
use crate::error::RunError;
use crate::fsutil::copy_tree;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Inputs materialized for one run and the final command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedInputs {
    pub command: String,
    /// Host paths of the materialized inputs
    pub inputs: BTreeMap<String, PathBuf>,
}

#[async_trait]
pub trait InputResolver: Send + Sync {
    async fn resolve(&self, unit: &RunUnit) -> Result<ResolvedInputs, RunError>;
}

/// Copies local inputs into `<workdir>/inputs/<name>`
///
/// The command sees each input where its execution mode mounts it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalInputResolver;

#[async_trait]
impl InputResolver for LocalInputResolver {
    async fn resolve(&self, unit: &RunUnit) -> Result<ResolvedInputs, RunError> {
        let declared = unit.definition.inputs.clone();
        let inputs_dir = unit.inputs_dir();

        let inputs = tokio::task::spawn_blocking(move || {
            let mut resolved = BTreeMap::new();
            for (name, source) in declared {
                let target = inputs_dir.join(&name);
                let path = copy_input(&source, &target)?;
                debug!(input = %name, path = %path.display(), "input resolved");
                resolved.insert(name, path);
            }
            Ok::<_, RunError>(resolved)
        })
        .await
        .map_err(|e| RunError::Task {
            task: "resolve_inputs",
            message: e.to_string(),
        })??;

        let visible: BTreeMap<String, PathBuf> = inputs
            .iter()
            .map(|(name, path)| (name.clone(), unit.command_path(path)))
            .collect();
        let command = substitute(&unit.definition.command, &visible, &unit.definition.params)?;
        Ok(ResolvedInputs { command, inputs })
    }
}

/// Copy a file or directory input; returns the path the command should see
fn copy_input(source: &Path, target: &Path) -> Result<PathBuf, RunError> {
    let meta = std::fs::metadata(source)
        .map_err(|e| RunError::Input(format!("{}: {}", source.display(), e)))?;
    let io = |path: &Path, e: std::io::Error| RunError::Input(format!("copying {}: {}", path.display(), e));

    if meta.is_file() {
        let name = source
            .file_name()
            .ok_or_else(|| RunError::Input(format!("input has no file name: {}", source.display())))?;
        std::fs::create_dir_all(target).map_err(|e| io(target, e))?;
        let dest = target.join(name);
        std::fs::copy(source, &dest).map_err(|e| io(source, e))?;
        return Ok(dest);
    }

    copy_tree(source, target).map_err(|e| io(source, e))?;
    Ok(target.to_path_buf())
}

/// Replace `{inputs.<name>}` and `{params.<name>}` placeholders
///
/// Other braces are left alone, so shell syntax such as `${HOME}` passes
/// through. An unknown input or parameter name is an error.
pub fn substitute(
    template: &str,
    inputs: &BTreeMap<String, PathBuf>,
    params: &BTreeMap<String, String>,
) -> Result<String, RunError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return Ok(out);
        };

        let key = &after[..close];
        let value = if let Some(name) = key.strip_prefix("inputs.") {
            Some(
                inputs
                    .get(name)
                    .map(|p| p.to_string_lossy().into_owned())
                    .ok_or_else(|| RunError::Input(format!("unknown input `{}` in command", name)))?,
            )
        } else if let Some(name) = key.strip_prefix("params.") {
            Some(
                params
                    .get(name)
                    .cloned()
                    .ok_or_else(|| RunError::Input(format!("unknown parameter `{}` in command", name)))?,
            )
        } else {
            None
        };

        match value {
            Some(value) => out.push_str(&value),
            None => {
                out.push('{');
                out.push_str(key);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    Ok(out)
}
