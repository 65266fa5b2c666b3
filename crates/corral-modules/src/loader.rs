//! Module packages: config, npm fetch and archive extraction.
//!
//! Extension modules are published as npm packages that carry no binary,
//! only a `modules.json` pointing at one zip archive per platform:
//!
//! ```json
//! { "platform": { "Linux-x86_64": { "path": "https://…/search.zip", "name": "search.so" } } }
//! ```
//!
//! [`ModuleLoader`] installs the package, picks the requested platform,
//! downloads the archive and unpacks the named library into
//! `<state>/mod/<platform>/`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ModuleError;

/// File inside an npm package describing the per-platform archives.
pub const METADATA_FILE: &str = "modules.json";

/// Subdirectory of the state dir that holds unpacked modules.
pub const MODULE_DIR: &str = "mod";

const ARCHIVE_NAME: &str = "module.zip";

/// One module to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// npm package name without the leading `@`, e.g. `redis/search`.
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
}

impl ModuleDescriptor {
    /// The npm install spec, `@<name>[@<version>]`.
    pub fn package_spec(&self) -> String {
        match &self.version {
            Some(version) => format!("@{}@{version}", self.name),
            None => format!("@{}", self.name),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ModulesFile {
    #[serde(default, rename = "module")]
    modules: Vec<ModuleDescriptor>,
}

#[derive(Debug, Deserialize)]
struct PackageMetadata {
    platform: BTreeMap<String, PlatformArchive>,
}

#[derive(Debug, Clone, Deserialize)]
struct PlatformArchive {
    /// URL (or local path) of the zip archive.
    path: String,
    /// Library file inside the archive.
    name: String,
}

/// Turns a descriptor into a loadable library path.
pub trait ModuleResolver {
    fn resolve(&self, descriptor: &ModuleDescriptor) -> Result<PathBuf, ModuleError>;
}

#[derive(Debug, Clone)]
pub struct ModuleLoader {
    config_path: PathBuf,
    state_dir: PathBuf,
    npm: PathBuf,
}

impl ModuleLoader {
    pub fn new(config_path: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            state_dir: state_dir.into(),
            npm: PathBuf::from("npm"),
        }
    }

    /// Uses another npm executable.
    pub fn with_npm(mut self, npm: impl Into<PathBuf>) -> Self {
        self.npm = npm.into();
        self
    }

    pub fn module_dir(&self) -> PathBuf {
        self.state_dir.join(MODULE_DIR)
    }

    /// Reads the `[[module]]` entries. A missing file means no modules.
    pub fn load_config(&self) -> Result<Vec<ModuleDescriptor>, ModuleError> {
        let raw = match std::fs::read_to_string(&self.config_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.config_path.display(), "no module config");
                return Ok(Vec::new());
            }
            Err(e) => return Err(ModuleError::io(&self.config_path)(e)),
        };
        let file: ModulesFile = toml::from_str(&raw).map_err(|source| ModuleError::Config {
            path: self.config_path.clone(),
            source,
        })?;
        for module in &file.modules {
            info!(module = %module.name, "module loaded from config");
        }
        Ok(file.modules)
    }

    /// Installs each module's npm package under the state dir.
    pub fn fetch_packages(&self, modules: &[ModuleDescriptor]) -> Result<(), ModuleError> {
        for module in modules {
            let package = module.package_spec();
            info!(%package, "installing npm package");
            let status = Command::new(&self.npm)
                .arg("install")
                .arg("--prefix")
                .arg(&self.state_dir)
                .arg(&package)
                .status()
                .map_err(ModuleError::io(&self.npm))?;
            if !status.success() {
                return Err(ModuleError::Npm {
                    package,
                    status: status.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Downloads and unpacks every module, returning the library paths.
    pub fn extract(&self, modules: &[ModuleDescriptor]) -> Result<Vec<PathBuf>, ModuleError> {
        modules.iter().map(|m| self.resolve(m)).collect()
    }

    fn package_dir(&self, module: &ModuleDescriptor) -> Result<PathBuf, ModuleError> {
        let node_modules = self.state_dir.join("node_modules");
        let direct = node_modules.join(format!("@{}", module.name));
        if direct.is_dir() {
            return Ok(direct);
        }

        // fall back to any scope holding a package with the same basename
        let basename = module.name.rsplit('/').next().unwrap_or(&module.name);
        let scopes = std::fs::read_dir(&node_modules).map_err(ModuleError::io(&node_modules))?;
        scopes
            .filter_map(Result::ok)
            .map(|scope| scope.path().join(basename))
            .find(|candidate| candidate.join(METADATA_FILE).is_file())
            .ok_or_else(|| ModuleError::Metadata {
                path: direct,
                reason: "package not installed".into(),
            })
    }

    fn read_metadata(&self, package_dir: &Path) -> Result<PackageMetadata, ModuleError> {
        let path = package_dir.join(METADATA_FILE);
        let raw = std::fs::read(&path).map_err(ModuleError::io(&path))?;
        serde_json::from_slice(&raw).map_err(|e| ModuleError::Metadata {
            path,
            reason: e.to_string(),
        })
    }

    fn download(&self, source: &str, dest: &Path) -> Result<(), ModuleError> {
        let mut out = File::create(dest).map_err(ModuleError::io(dest))?;
        if source.starts_with("http://") || source.starts_with("https://") {
            let response = ureq::get(source)
                .call()
                .map_err(|e| ModuleError::Download {
                    url: source.to_string(),
                    source: Box::new(e),
                })?;
            let mut body = response.into_body().into_reader();
            io::copy(&mut body, &mut out).map_err(ModuleError::io(dest))?;
        } else {
            let mut file = File::open(source).map_err(ModuleError::io(source))?;
            io::copy(&mut file, &mut out).map_err(ModuleError::io(dest))?;
        }
        Ok(())
    }
}

impl ModuleResolver for ModuleLoader {
    fn resolve(&self, module: &ModuleDescriptor) -> Result<PathBuf, ModuleError> {
        let metadata = self.read_metadata(&self.package_dir(module)?)?;
        let available: Vec<String> = metadata.platform.keys().cloned().collect();
        let platform = select_platform(&available, module.platform.as_deref()).ok_or_else(|| {
            ModuleError::PlatformUnavailable {
                module: module.name.clone(),
                wanted: module.platform.clone(),
                available: available.clone(),
            }
        })?;
        let archive_info = &metadata.platform[platform];

        let target_dir = self.module_dir().join(platform.to_lowercase());
        std::fs::create_dir_all(&target_dir).map_err(ModuleError::io(&target_dir))?;

        let archive_path = self.module_dir().join(ARCHIVE_NAME);
        info!(module = %module.name, %platform, "downloading module archive");
        self.download(&archive_info.path, &archive_path)?;

        let library = target_dir.join(&archive_info.name);
        let unpacked = unpack(&archive_path, &archive_info.name, &library);
        let _ = std::fs::remove_file(&archive_path);
        unpacked?;

        make_executable(&library)?;
        info!(module = %module.name, path = %library.display(), "module ready");
        Ok(library)
    }
}

/// Matches the wanted platform case-insensitively. Without a wanted
/// platform, a package with a single build is unambiguous.
fn select_platform<'a>(available: &'a [String], wanted: Option<&str>) -> Option<&'a str> {
    match wanted {
        Some(wanted) => available
            .iter()
            .find(|p| p.eq_ignore_ascii_case(wanted))
            .map(String::as_str),
        None if available.len() == 1 => Some(available[0].as_str()),
        None => None,
    }
}

fn unpack(archive: &Path, entry: &str, dest: &Path) -> Result<(), ModuleError> {
    let archive_err = |source| ModuleError::Archive {
        archive: archive.to_path_buf(),
        entry: entry.to_string(),
        source,
    };
    let file = File::open(archive).map_err(ModuleError::io(archive))?;
    let mut zip = zip::ZipArchive::new(file).map_err(archive_err)?;
    let mut member = zip.by_name(entry).map_err(archive_err)?;
    let mut out = File::create(dest).map_err(ModuleError::io(dest))?;
    io::copy(&mut member, &mut out).map_err(ModuleError::io(dest))?;
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), ModuleError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .map_err(ModuleError::io(path))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), ModuleError> {
    Ok(())
}

/// Every shared library below `dir`, sorted. A missing dir yields none.
pub fn find_libraries(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("so" | "dylib")
            ) {
                found.push(path);
            }
        }
    }
    found.sort();
    found
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_zip(path: &Path, entry: &str, contents: &[u8]) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        writer
            .start_file(entry, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(contents).unwrap();
        writer.finish().unwrap();
    }

    /// A state dir with an installed package whose archive is local.
    fn installed_package(state: &Path, platforms: &[&str]) {
        let package = state.join("node_modules/@acme/search");
        std::fs::create_dir_all(&package).unwrap();
        let archive = state.join("search.zip");
        write_zip(&archive, "search.so", b"\x7fELF fake");

        let platform: serde_json::Map<String, serde_json::Value> = platforms
            .iter()
            .map(|p| {
                (
                    p.to_string(),
                    serde_json::json!({ "path": archive.display().to_string(), "name": "search.so" }),
                )
            })
            .collect();
        std::fs::write(
            package.join(METADATA_FILE),
            serde_json::to_vec(&serde_json::json!({ "platform": platform })).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn missing_config_means_no_modules() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ModuleLoader::new(dir.path().join("modules.toml"), dir.path());
        assert!(loader.load_config().unwrap().is_empty());
    }

    #[test]
    fn config_lists_modules() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modules.toml");
        std::fs::write(
            &path,
            r#"
[[module]]
name = "acme/search"
version = "2.8.4"
platform = "Linux-x86_64"

[[module]]
name = "acme/json"
"#,
        )
        .unwrap();

        let modules = ModuleLoader::new(&path, dir.path()).load_config().unwrap();
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0].package_spec(), "@acme/search@2.8.4");
        assert_eq!(modules[1].package_spec(), "@acme/json");
        assert_eq!(modules[1].platform, None);
    }

    #[test]
    fn bad_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modules.toml");
        std::fs::write(&path, "[[module]]\nversion = 3\n").unwrap();
        let err = ModuleLoader::new(&path, dir.path()).load_config().unwrap_err();
        assert!(matches!(err, ModuleError::Config { .. }), "{err}");
    }

    #[test]
    fn extract_picks_platform_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        installed_package(dir.path(), &["Linux-x86_64", "macOS-arm64"]);
        let loader = ModuleLoader::new(dir.path().join("modules.toml"), dir.path());

        let paths = loader
            .extract(&[ModuleDescriptor {
                name: "acme/search".into(),
                version: None,
                platform: Some("linux-X86_64".into()),
            }])
            .unwrap();

        let expected = dir.path().join("mod/linux-x86_64/search.so");
        assert_eq!(paths, [expected.clone()]);
        assert_eq!(std::fs::read(&expected).unwrap(), b"\x7fELF fake");
        assert!(!dir.path().join("mod").join(ARCHIVE_NAME).exists());
        assert_eq!(find_libraries(&dir.path().join("mod")), [expected]);
    }

    #[test]
    fn unknown_platform_lists_what_exists() {
        let dir = tempfile::tempdir().unwrap();
        installed_package(dir.path(), &["Linux-x86_64", "macOS-arm64"]);
        let loader = ModuleLoader::new(dir.path().join("modules.toml"), dir.path());

        let err = loader
            .resolve(&ModuleDescriptor {
                name: "acme/search".into(),
                version: None,
                platform: None,
            })
            .unwrap_err();
        match err {
            ModuleError::PlatformUnavailable { available, .. } => {
                assert_eq!(available, ["Linux-x86_64", "macOS-arm64"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn single_platform_needs_no_selection() {
        let dir = tempfile::tempdir().unwrap();
        installed_package(dir.path(), &["Linux-x86_64"]);
        let loader = ModuleLoader::new(dir.path().join("modules.toml"), dir.path());
        let path = loader
            .resolve(&ModuleDescriptor {
                name: "acme/search".into(),
                version: None,
                platform: None,
            })
            .unwrap();
        assert!(path.ends_with("mod/linux-x86_64/search.so"));
    }

    #[cfg(unix)]
    #[test]
    fn fetch_runs_npm_install() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let npm = dir.path().join("npm");
        let log = dir.path().join("npm.log");
        std::fs::write(&npm, format!("#!/bin/sh\necho \"$@\" >> {}\n", log.display())).unwrap();
        std::fs::set_permissions(&npm, std::fs::Permissions::from_mode(0o755)).unwrap();

        let loader = ModuleLoader::new(dir.path().join("modules.toml"), dir.path()).with_npm(&npm);
        loader
            .fetch_packages(&[ModuleDescriptor {
                name: "acme/search".into(),
                version: Some("1.0.0".into()),
                platform: None,
            }])
            .unwrap();

        let logged = std::fs::read_to_string(&log).unwrap();
        assert_eq!(
            logged.trim(),
            format!("install --prefix {} @acme/search@1.0.0", dir.path().display())
        );
    }

    #[test]
    fn find_libraries_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("linux")).unwrap();
        std::fs::write(dir.path().join("linux/a.so"), b"").unwrap();
        std::fs::write(dir.path().join("linux/readme.txt"), b"").unwrap();
        std::fs::write(dir.path().join("b.dylib"), b"").unwrap();

        let found = find_libraries(dir.path());
        assert_eq!(found, [dir.path().join("b.dylib"), dir.path().join("linux/a.so")]);
        assert!(find_libraries(&dir.path().join("missing")).is_empty());
    }
}
