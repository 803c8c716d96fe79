//! Remote commands consumed by the upgrader
//!
//! Every dynamic segment (paths, service names, image references) is single-quote
//! escaped when rendered. File contents never go through the command line, they
//! are written to the command's stdin.

use std::fmt;

/// Output printed by [`RemoteCommand::DirExists`] when the directory exists
pub const DIR_EXISTS_MARKER: &str = "exists";

/// A remote operation, rendered to a shell command line by [`RemoteCommand::render`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    /// Print `exists` or `absent`
    DirExists { path: String },

    /// Create `dir` and copy every file of `files` into it
    Backup { dir: String, files: Vec<String> },

    /// Print the whole file
    ReadFile { path: String },

    /// Replace the file with `content` in one step (temp file + rename)
    WriteFile { path: String, content: String },

    /// List the image reference of every container, one per line
    ListImages,

    /// Recreate one compose service without touching its dependencies
    RestartService {
        compose_command: String,
        compose_file: String,
        service: String,
    },

    /// Load an image archive into the local docker daemon
    LoadImage { archive: String },

    /// Push an image reference to its registry
    PushImage { reference: String },
}

impl RemoteCommand {
    /// Whether the command changes state on the host
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            RemoteCommand::DirExists { .. } | RemoteCommand::ReadFile { .. } | RemoteCommand::ListImages
        )
    }

    /// Data to pipe into the command's stdin
    pub fn stdin(&self) -> Option<&str> {
        match self {
            RemoteCommand::WriteFile { content, .. } => Some(content),
            _ => None,
        }
    }

    /// Render the shell command line
    pub fn render(&self) -> String {
        match self {
            RemoteCommand::DirExists { path } => format!(
                "if [ -d {} ]; then echo {}; else echo absent; fi",
                quote(path),
                DIR_EXISTS_MARKER
            ),
            RemoteCommand::Backup { dir, files } => {
                let dir = quote(dir);
                let mut parts = vec![format!("mkdir -p {}", dir)];
                parts.extend(files.iter().map(|f| format!("cp {} {}", quote(f), dir)));
                parts.join(" && ")
            }
            RemoteCommand::ReadFile { path } => format!("cat {}", quote(path)),
            RemoteCommand::WriteFile { path, .. } => {
                let tmp = quote(&format!("{}.tmp", path));
                format!("cat > {tmp} && mv {tmp} {}", quote(path))
            }
            RemoteCommand::ListImages => "docker ps -a --format '{{.Image}}'".to_string(),
            RemoteCommand::RestartService {
                compose_command,
                compose_file,
                service,
            } => {
                let program = compose_command
                    .split_whitespace()
                    .map(quote)
                    .collect::<Vec<_>>()
                    .join(" ");
                format!(
                    "{} -f {} up -d --no-deps {}",
                    program,
                    quote(compose_file),
                    quote(service)
                )
            }
            RemoteCommand::LoadImage { archive } => format!("docker load -i {}", quote(archive)),
            RemoteCommand::PushImage { reference } => format!("docker push {}", quote(reference)),
        }
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// POSIX single-quote escaping. Plain words are left bare for readable logs.
pub fn quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '@' | '=' | '+' | ','));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}
