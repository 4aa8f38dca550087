//! Build metadata of this crate.

/// Name, version and runtime dependencies, fixed at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub dependencies: &'static [&'static str],
}

impl PackageInfo {
    /// HTTP user agent sent by the gRPC transport.
    pub fn user_agent(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }
}

pub const PACKAGE: PackageInfo = PackageInfo {
    name: env!("CARGO_PKG_NAME"),
    version: env!("CARGO_PKG_VERSION"),
    dependencies: &["tonic", "prost"],
};
