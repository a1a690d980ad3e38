//! gRPC stub and swagger generation.
//!
//! Both are thin wrappers around external generators: protoc with the go,
//! grpc-gateway and swagger plugins, and `swag init`.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use log::{info, warn};
use regex::Regex;
use walkdir::WalkDir;

use crate::environment::ExecutionEnvironment;
use crate::error::{ProvisionError, Result};
use crate::exec::{CommandExecutor, Invocation};

const PROTO_EXTENSION: &str = "proto";

/// Group the `.proto` files under `proto_dir` by their `package` declaration.
///
/// Files without a declaration are skipped.
///
/// # Errors
///
/// Returns [`ProvisionError::Io`] when the tree cannot be walked or a file
/// cannot be read.
pub fn group_proto_packages(proto_dir: &Utf8Path) -> Result<BTreeMap<String, Vec<Utf8PathBuf>>> {
    let declaration =
        Regex::new(r"package\s+(\S+);").map_err(|err| ProvisionError::Io(std::io::Error::other(err)))?;
    let mut packages: BTreeMap<String, Vec<Utf8PathBuf>> = BTreeMap::new();

    for entry in WalkDir::new(proto_dir).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(path) = Utf8PathBuf::try_from(entry.into_path()) else {
            warn!("skipping non UTF-8 path under {proto_dir}");
            continue;
        };
        if path.extension() != Some(PROTO_EXTENSION) {
            continue;
        }
        let contents = std::fs::read_to_string(&path)?;
        let Some(package) = declaration.captures(&contents).and_then(|caps| caps.get(1)) else {
            warn!("skipping {path}: no package declaration");
            continue;
        };
        packages
            .entry(package.as_str().to_owned())
            .or_default()
            .push(path);
    }
    Ok(packages)
}

/// Inputs for one gRPC generation run.
#[derive(Debug, Clone, Copy)]
pub struct GrpcGeneration<'a> {
    /// The protoc executable.
    pub protoc: &'a Utf8Path,
    /// Root of the `.proto` tree.
    pub proto_dir: &'a Utf8Path,
    /// `GOPATH`, for the plugin include trees.
    pub gopath: &'a Utf8Path,
    /// Where generated sources are written.
    pub project_dir: &'a Utf8Path,
}

impl GrpcGeneration<'_> {
    /// Run protoc once per package. Returns the number of packages
    /// generated, zero when the proto directory does not exist.
    ///
    /// # Errors
    ///
    /// Returns walk errors and the first failing protoc invocation.
    pub fn run(&self, executor: &dyn CommandExecutor, env: &ExecutionEnvironment) -> Result<usize> {
        if !self.proto_dir.is_dir() {
            info!("no proto directory at {}; nothing to generate", self.proto_dir);
            return Ok(0);
        }
        let packages = group_proto_packages(self.proto_dir)?;
        for (package, files) in &packages {
            info!("generating gRPC sources for package `{package}` ({} file(s))", files.len());
            let invocation = Invocation::new(self.protoc.as_str())
                .args(self.arguments())
                .args(files.iter().map(|file| file.as_str()))
                .env(env.clone())
                .current_dir(self.project_dir.to_owned());
            executor.run_checked(&invocation)?;
        }
        Ok(packages.len())
    }

    fn arguments(&self) -> Vec<String> {
        let src = self.gopath.join("src");
        let googleapis = src.join("github.com/grpc-ecosystem/grpc-gateway/third_party/googleapis");
        let out = self.project_dir;
        vec![
            format!("-I{}", self.proto_dir),
            format!("-I{src}"),
            format!("-I{googleapis}"),
            format!("--go_out=plugins=grpc:{out}"),
            format!("--grpc-gateway_out=logtostderr=true:{out}"),
            format!("--swagger_out=logtostderr=true:{out}"),
        ]
    }
}

/// Run `swag init` in `project_dir`.
///
/// # Errors
///
/// Returns the subprocess error when swag fails or cannot be started.
pub fn generate_swagger(
    executor: &dyn CommandExecutor,
    env: &ExecutionEnvironment,
    project_dir: &Utf8Path,
) -> Result<()> {
    info!("generating swagger documentation in {project_dir}");
    let invocation = Invocation::new(env.resolve_program("swag"))
        .arg("init")
        .env(env.clone())
        .current_dir(project_dir.to_owned());
    executor.run_checked(&invocation)?;
    Ok(())
}
