use crate::error::{Result, VagrantMcpError};
use crate::utils::shell::escape;
use flate2::write::GzEncoder;
use std::ffi::OsStr;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use tokio::process::Command;

/// Archive format used when uploading with compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    Tar,
    #[default]
    Tgz,
    Zip,
}

impl FromStr for Compression {
    type Err = VagrantMcpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tar" => Ok(Compression::Tar),
            "tgz" | "gzip" | "tar.gz" => Ok(Compression::Tgz),
            "zip" => Ok(Compression::Zip),
            other => Err(VagrantMcpError::InvalidInput(format!(
                "unknown compression type: {} (expected tar, tgz or zip)",
                other
            ))),
        }
    }
}

impl Compression {
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::Tar => "tar",
            Compression::Tgz => "tar.gz",
            Compression::Zip => "zip",
        }
    }

    /// Pack `source` into `archive` on the host. The archive holds one
    /// top-level entry named after `source`.
    pub async fn pack(&self, source: &Path, archive: &Path) -> Result<()> {
        let entry = source
            .file_name()
            .ok_or_else(|| {
                VagrantMcpError::InvalidInput(format!("cannot archive {}", source.display()))
            })?
            .to_os_string();

        match self {
            Compression::Tar | Compression::Tgz => {
                let gzip = *self == Compression::Tgz;
                let source = source.to_path_buf();
                let archive = archive.to_path_buf();
                tokio::task::spawn_blocking(move || write_tar(&source, Path::new(&entry), &archive, gzip))
                    .await
                    .map_err(|e| VagrantMcpError::failed("archive upload", e))?
            }
            Compression::Zip => zip_with_host_tool(source, &entry, archive).await,
        }
    }

    /// Guest command that unpacks `remote_archive` into `destination` and removes it.
    pub fn unpack_command(&self, remote_archive: &str, destination: &str) -> String {
        let archive = escape(remote_archive);
        let dest = escape(destination);
        let extract = match self {
            Compression::Tar => format!("tar -xf {} -C {}", archive, dest),
            Compression::Tgz => format!("tar -xzf {} -C {}", archive, dest),
            Compression::Zip => format!("unzip -oq {} -d {}", archive, dest),
        };
        format!(
            "mkdir -p {dest} && {extract}; rc=$?; rm -f {archive}; exit $rc",
            dest = dest,
            extract = extract,
            archive = archive
        )
    }
}

fn write_tar(source: &Path, entry: &Path, archive: &Path, gzip: bool) -> Result<()> {
    let file = File::create(archive)?;
    if gzip {
        let encoder = GzEncoder::new(file, flate2::Compression::default());
        let encoder = append_source(tar::Builder::new(encoder), source, entry)?;
        encoder.finish()?;
    } else {
        append_source(tar::Builder::new(file), source, entry)?;
    }
    Ok(())
}

/// Add `source` under `entry` and return the finished inner writer.
fn append_source<W: Write>(mut builder: tar::Builder<W>, source: &Path, entry: &Path) -> Result<W> {
    builder.follow_symlinks(false);
    if source.is_dir() {
        builder.append_dir_all(entry, source)?;
    } else {
        builder.append_path_with_name(source, entry)?;
    }
    Ok(builder.into_inner()?)
}

/// No zip crate in the stack; `zip` on the host does the packing.
async fn zip_with_host_tool(source: &Path, entry: &OsStr, archive: &Path) -> Result<()> {
    let parent = source.parent().unwrap_or_else(|| Path::new("."));
    let output = Command::new("zip")
        .arg("-qr")
        .arg(archive)
        .arg(entry)
        .current_dir(parent)
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VagrantMcpError::DependencyMissing("zip (needed for zip uploads)".to_string())
            } else {
                VagrantMcpError::failed("archive upload", e)
            }
        })?;

    if !output.status.success() {
        return Err(VagrantMcpError::failed(
            "archive upload",
            String::from_utf8_lossy(&output.stderr).trim(),
        ));
    }
    Ok(())
}
