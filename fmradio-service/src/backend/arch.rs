//! Backend binary selection by hardware ABI.

use std::fmt;
use std::path::{Path, PathBuf};

use super::BackendError;

/// CPU architecture of a backend build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Aarch64,
    Armv7a,
}

impl Arch {
    /// Canonical tag used in backend binary names.
    pub fn tag(self) -> &'static str {
        match self {
            Arch::Aarch64 => "aarch64",
            Arch::Armv7a => "armv7a",
        }
    }

    fn from_abi(abi: &str) -> Option<Self> {
        match abi {
            "arm64-v8a" => Some(Arch::Aarch64),
            "armeabi-v7a" => Some(Arch::Armv7a),
            _ => None,
        }
    }

    /// Path of the backend binary for this architecture inside `dir`.
    pub fn backend_program(self, dir: &Path) -> PathBuf {
        dir.join(format!("fmbin-{}", self.tag()))
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Map supported ABIs, most preferred first, to a backend architecture.
///
/// The first known identifier wins.
pub fn determine_arch<S: AsRef<str>>(abis: &[S]) -> Result<Arch, BackendError> {
    abis.iter()
        .find_map(|abi| Arch::from_abi(abi.as_ref()))
        .ok_or_else(|| {
            BackendError::UnsupportedArchitecture(
                abis.iter().map(|abi| abi.as_ref().to_string()).collect(),
            )
        })
}

/// ABI identifiers of the running host.
pub fn host_abis() -> Vec<&'static str> {
    match std::env::consts::ARCH {
        "aarch64" => vec!["arm64-v8a", "armeabi-v7a"],
        "arm" => vec!["armeabi-v7a"],
        "x86_64" => vec!["x86_64"],
        "x86" => vec!["x86"],
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_abis() {
        assert_eq!(determine_arch(&["arm64-v8a"]).unwrap(), Arch::Aarch64);
        assert_eq!(determine_arch(&["armeabi-v7a"]).unwrap(), Arch::Armv7a);
    }

    #[test]
    fn test_first_known_abi_wins() {
        let abis = ["x86_64", "armeabi-v7a", "arm64-v8a"];
        assert_eq!(determine_arch(&abis).unwrap(), Arch::Armv7a);
    }

    #[test]
    fn test_unsupported_architecture() {
        match determine_arch(&["x86", "mips"]) {
            Err(BackendError::UnsupportedArchitecture(abis)) => {
                assert_eq!(abis, vec!["x86".to_string(), "mips".to_string()]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(determine_arch::<&str>(&[]).is_err());
    }

    #[test]
    fn test_backend_program_path() {
        assert_eq!(
            Arch::Aarch64.backend_program(Path::new("/data/fm")),
            PathBuf::from("/data/fm/fmbin-aarch64")
        );
    }
}
