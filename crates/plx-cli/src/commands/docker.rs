//! Docker command: Dockerfile generation

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Subcommand};
use serde_json::Value;
use tracing::info;

use plx_schema::init::DockerfileInit;

use crate::{Error, Result};

const DEFAULT_FILENAME: &str = "Dockerfile";
const DEFAULT_WORKDIR: &str = "/code";
const DEFAULT_USERNAME: &str = "polyaxon-user";

#[derive(Args, Debug)]
pub struct DockerArgs {
    #[command(subcommand)]
    pub command: DockerCommands,
}

#[derive(Subcommand, Debug)]
pub enum DockerCommands {
    /// Render a Dockerfile from a build context
    Generate(GenerateArgs),
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Dockerfile build context as JSON
    #[arg(long)]
    pub build_context: String,

    /// Directory the Dockerfile is written to
    #[arg(long)]
    pub destination: PathBuf,

    /// Also copy the result to this path
    #[arg(long)]
    pub copy_path: Option<PathBuf>,

    /// Record the file as a run artifact
    #[arg(long)]
    pub track: bool,
}

pub async fn run(args: DockerArgs) -> Result<ExitCode> {
    match args.command {
        DockerCommands::Generate(args) => generate(&args).map(|_| ExitCode::SUCCESS),
    }
}

/// Render and write the Dockerfile, returning its path
pub fn generate(args: &GenerateArgs) -> Result<PathBuf> {
    let context: DockerfileInit = serde_json::from_str(&args.build_context)
        .map_err(|e| Error::validation(format!("invalid build context: {}", e)))?;
    let content = render(&context)?;

    let filename = context.filename.as_deref().unwrap_or(DEFAULT_FILENAME);
    let path = args.destination.join(filename);
    write_file(&path, &content)?;
    if let Some(copy_path) = &args.copy_path {
        write_file(&copy_path.join(filename), &content)?;
    }
    info!(path = %path.display(), track = args.track, "dockerfile generated");
    Ok(path)
}

pub(crate) fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    std::fs::write(path, content).map_err(|e| Error::io(path, e))
}

/// Dockerfile text for a build context
pub fn render(context: &DockerfileInit) -> Result<String> {
    let workdir = context.workdir.as_deref().unwrap_or(DEFAULT_WORKDIR);
    let mut lines = vec![format!("FROM {}", context.image)];

    if let Some(lang) = &context.lang_env {
        lines.push(String::new());
        for var in ["LC_ALL", "LANG", "LANGUAGE"] {
            lines.push(format!("ENV {} {}", var, lang));
        }
    }

    if let (Some(uid), Some(gid)) = (context.uid, context.gid) {
        let username = context.username.as_deref().unwrap_or(DEFAULT_USERNAME);
        lines.push(String::new());
        lines.push(format!(
            "RUN groupadd -g {gid} -r {user} && useradd -r -m -g {gid} -u {uid} {user}",
            gid = gid,
            uid = uid,
            user = username
        ));
        lines.push(format!("USER {}", username));
    }

    lines.push(String::new());
    lines.push(format!("WORKDIR {}", workdir));
    if let Some(path) = &context.workdir_path {
        lines.push(format!("COPY {} {}", path, workdir));
    }

    for entry in &context.copy {
        lines.push(copy_line(entry, workdir)?);
    }

    if !context.env.is_empty() || !context.path.is_empty() {
        lines.push(String::new());
    }
    for (key, value) in &context.env {
        lines.push(format!("ENV {} {}", key, value));
    }
    if !context.path.is_empty() {
        lines.push(format!("ENV PATH=\"${{PATH}}:{}\"", context.path.join(":")));
    }

    if !context.run.is_empty() {
        lines.push(String::new());
        if let Some(shell) = &context.shell {
            lines.push(format!("SHELL [\"{}\", \"-c\"]", shell));
        }
        for command in &context.run {
            lines.push(format!("RUN {}", command));
        }
    }

    for entry in &context.post_run_copy {
        lines.push(copy_line(entry, workdir)?);
    }

    let mut content = lines.join("\n");
    content.push('\n');
    Ok(content)
}

fn copy_line(entry: &Value, workdir: &str) -> Result<String> {
    match entry {
        Value::String(src) => Ok(format!("COPY {} {}", src, workdir)),
        Value::Array(pair) => match pair.as_slice() {
            [Value::String(src), Value::String(dst)] => Ok(format!("COPY {} {}", src, dst)),
            _ => Err(Error::validation(format!("copy entry `{}` is not [src, dst]", entry))),
        },
        other => Err(Error::validation(format!("copy entry `{}` is not a path", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(value: Value) -> DockerfileInit {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn minimal_context() {
        let content = render(&context(json!({"image": "python:3.11"}))).unwrap();
        assert_eq!(content, "FROM python:3.11\n\nWORKDIR /code\n");
    }

    #[test]
    fn full_context_keeps_section_order() {
        let content = render(&context(json!({
            "image": "python:3.11",
            "langEnv": "en_US.UTF-8",
            "uid": 1000,
            "gid": 1000,
            "workdirPath": ".",
            "copy": ["requirements.txt", ["setup.py", "/opt/setup.py"]],
            "env": [["PYTHONUNBUFFERED", "1"]],
            "path": ["/opt/bin"],
            "shell": "/bin/bash",
            "run": ["pip install -r requirements.txt"],
            "postRunCopy": ["src"],
        })))
        .unwrap();

        let order: Vec<usize> = [
            "FROM python:3.11",
            "ENV LC_ALL en_US.UTF-8",
            "useradd -r -m -g 1000 -u 1000 polyaxon-user",
            "USER polyaxon-user",
            "WORKDIR /code",
            "COPY . /code",
            "COPY requirements.txt /code",
            "COPY setup.py /opt/setup.py",
            "ENV PYTHONUNBUFFERED 1",
            "ENV PATH=\"${PATH}:/opt/bin\"",
            "SHELL [\"/bin/bash\", \"-c\"]",
            "RUN pip install -r requirements.txt",
            "COPY src /code",
        ]
        .iter()
        .map(|needle| content.find(needle).unwrap_or_else(|| panic!("missing `{}`", needle)))
        .collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]), "{}", content);
    }

    #[test]
    fn bad_copy_entry_is_rejected() {
        let err = render(&context(json!({"image": "x", "copy": [1]}))).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn generate_writes_and_copies() {
        let dir = tempfile::tempdir().unwrap();
        let args = GenerateArgs {
            build_context: json!({"image": "busybox", "filename": "Dockerfile.plx"}).to_string(),
            destination: dir.path().join("init"),
            copy_path: Some(dir.path().join("copy")),
            track: false,
        };
        let path = generate(&args).unwrap();
        assert_eq!(path, dir.path().join("init/Dockerfile.plx"));
        assert!(std::fs::read_to_string(dir.path().join("copy/Dockerfile.plx"))
            .unwrap()
            .starts_with("FROM busybox"));
    }
}
