use super::environment::{Environment, WORKING_DIR_MODE};
use crate::domain::ComposeError;
use anyhow::{Context, Result, bail};
use regex::Regex;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

pub const DOCKERFILE_NAME: &str = "Dockerfile";
const BUILD_MARKER: &str = r"Successfully built ([a-fA-F0-9]+)";

impl Environment {
    /// Builds the image rooted at `path` and returns its id.
    pub fn build_image(&self, name: &str, path: &Path) -> Result<String> {
        if !self.fs.exists(path) {
            bail!(ComposeError::PathNotFound(path.to_path_buf()));
        }

        info!("starting to build docker image {name}");
        let cmd = self.container_command(vec![
            "build".to_string(),
            path.to_string_lossy().into_owned(),
        ]);
        let output = self.capture(cmd, &format!("build docker image at {:?}", path))?;
        let id = parse_image_id(&String::from_utf8_lossy(&output))?;
        info!("finished building docker image {name}: {id}");

        Ok(id)
    }

    /// Builds an image from Dockerfile text in a throwaway build context.
    pub fn build_image_from_script(&self, name: &str, script: &str) -> Result<String> {
        self.build_script_in(name, script, &Uuid::new_v4().to_string())
    }

    fn build_script_in(&self, name: &str, script: &str, dir_name: &str) -> Result<String> {
        let dir = self.fs.temp_dir().join(dir_name);
        self.fs
            .create_dir_all(&dir, WORKING_DIR_MODE)
            .with_context(|| format!("creating build context {:?}", dir))?;

        let result = self
            .write_dockerfile(&dir, script)
            .and_then(|()| self.build_image(name, &dir));

        if let Err(e) = self.fs.remove_all(&dir) {
            warn!("failed to remove build context {:?}: {e}", dir);
        }
        result
    }

    fn write_dockerfile(&self, dir: &Path, script: &str) -> Result<()> {
        let path = dir.join(DOCKERFILE_NAME);
        let mut file = self
            .fs
            .create(&path)
            .with_context(|| format!("creating {:?}", path))?;
        file.write_all(script.as_bytes())
            .and_then(|()| file.flush())
            .with_context(|| format!("writing {:?}", path))
    }
}

/// Extracts the image id from `docker build` output.
pub fn parse_image_id(output: &str) -> Result<String> {
    let marker = Regex::new(BUILD_MARKER).context("compiling build marker pattern")?;
    match marker.captures(output).and_then(|caps| caps.get(1)) {
        Some(id) => Ok(id.as_str().to_string()),
        None => bail!(ComposeError::MissingBuildMarker {
            output: output.to_string(),
        }),
    }
}
