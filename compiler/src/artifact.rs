//! Artifact packaging: image file, launcher stub, runtime descriptor.
//!
//! The assembled image is pure bytes; this module gives it a home on
//! disk. Three pieces, each written with temp-file-then-rename semantics
//! so a failure never leaves a truncated artifact behind:
//!
//! - the managed module itself (`<app>.dll`),
//! - optionally a native launcher: a prebuilt apphost template copied
//!   next to the module with its embedded placeholder patched to the
//!   module's relative path,
//! - the `runtimeconfig.json` descriptor pairing the module with the
//!   runtime family, version, and roll-forward policy it targets.

use crate::assembler::APPLICATION_NAME;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

/// Well-known placeholder the apphost template embeds where the module
/// path belongs (the SHA-256 of "foobar", as text).
const APPHOST_PLACEHOLDER: &[u8] =
    b"c3ab8ff13720e8ad9047dd39466b3c8974e592c2fa383d4a3960714caef0c4f2";

/// The template reserves this much room for the patched path.
const APPHOST_PATH_MAX: usize = 1024;

// ── Runtime descriptor schema ───────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RuntimeConfig {
    runtime_options: RuntimeOptions,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RuntimeOptions {
    tfm: &'static str,
    roll_forward: &'static str,
    framework: Framework,
    config_properties: BTreeMap<&'static str, bool>,
}

#[derive(Serialize)]
struct Framework {
    name: &'static str,
    version: &'static str,
}

// ── Packaging ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct BuildOptions {
    /// Destination directory; defaults to the per-user desktop location.
    pub output_dir: Option<PathBuf>,
    /// Prebuilt apphost template; the launcher step is skipped without it.
    pub apphost_template: Option<PathBuf>,
}

#[derive(Debug)]
pub struct BuildArtifacts {
    pub module_path: PathBuf,
    pub launcher_path: Option<PathBuf>,
    pub config_path: PathBuf,
}

/// `<home>/Desktop/<app>` — the well-known per-user output location.
pub fn default_output_dir() -> io::Result<PathBuf> {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                "no home directory for the default output location",
            )
        })?;
    Ok(PathBuf::from(home).join("Desktop").join(APPLICATION_NAME))
}

/// Write the image and its companion artifacts into the output directory.
pub fn build_application(image: &[u8], options: &BuildOptions) -> io::Result<BuildArtifacts> {
    let dir = match &options.output_dir {
        Some(dir) => dir.clone(),
        None => default_output_dir()?,
    };
    fs::create_dir_all(&dir)?;

    let module_name = format!("{APPLICATION_NAME}.dll");
    let module_path = dir.join(&module_name);
    write_atomic(&module_path, image)?;
    info!(path = %module_path.display(), bytes = image.len(), "wrote managed image");

    let launcher_path = match &options.apphost_template {
        Some(template) => {
            let launcher_name = if cfg!(windows) {
                format!("{APPLICATION_NAME}.exe")
            } else {
                APPLICATION_NAME.to_string()
            };
            let launcher = dir.join(launcher_name);
            create_app_host(template, &launcher, &format!("./{module_name}"))?;
            info!(path = %launcher.display(), "wrote native launcher");
            Some(launcher)
        }
        None => None,
    };

    let config_path = dir.join(format!("{APPLICATION_NAME}.runtimeconfig.json"));
    write_runtime_config(&config_path)?;
    info!(path = %config_path.display(), "wrote runtime descriptor");

    Ok(BuildArtifacts {
        module_path,
        launcher_path,
        config_path,
    })
}

/// Copy the apphost template to `output`, patching its embedded
/// placeholder with the module's relative path.
pub fn create_app_host(template: &Path, output: &Path, module_rel: &str) -> io::Result<()> {
    if module_rel.len() + 1 > APPHOST_PATH_MAX {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "module path too long for the apphost template",
        ));
    }

    let mut host = fs::read(template)?;
    let offset = find(&host, APPHOST_PLACEHOLDER).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            "apphost template has no module-path placeholder",
        )
    })?;

    // Blank the placeholder text, then lay the NUL-terminated path over it.
    host[offset..offset + APPHOST_PLACEHOLDER.len()].fill(0);
    host[offset..offset + module_rel.len()].copy_from_slice(module_rel.as_bytes());

    write_atomic(output, &host)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(output, fs::Permissions::from_mode(0o755))?;
    }

    Ok(())
}

fn write_runtime_config(path: &Path) -> io::Result<()> {
    let config = RuntimeConfig {
        runtime_options: RuntimeOptions {
            tfm: "net8.0",
            roll_forward: "latestMajor",
            framework: Framework {
                name: "Microsoft.NETCore.App",
                version: "8.0.0",
            },
            config_properties: BTreeMap::from([("System.Runtime.TieredPGO", true)]),
        },
    };
    let json = serde_json::to_vec_pretty(&config).map_err(io::Error::other)?;
    write_atomic(path, &json)
}

/// Write via a sibling temp file and rename, so the destination is either
/// absent, the old content, or the complete new content — never truncated.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);
    if let Err(err) = fs::write(&tmp, bytes) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    fs::rename(&tmp, path)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
