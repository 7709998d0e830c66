//! What this build of the crate is: version, git revision and enabled features.

// Generated by `built` in build.rs.
mod raw {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// The crate version, such as 0.31.0
pub const G1_PKG_VERSION: &str = raw::PKG_VERSION;

/// Comma separated features enabled for this build
pub const G1_FEATURES: &str = raw::FEATURES_STR;

lazy_static! {
    /// The commit hash the crate was built from, with a `-dirty` suffix if the tree had local
    /// changes, or `unknown-git-version` outside a git checkout.
    pub static ref G1_GIT_VERSION: &'static str = &G1_GIT_VERSION_STRING;

    static ref G1_GIT_VERSION_STRING: String = match (raw::GIT_COMMIT_HASH, raw::GIT_DIRTY) {
        (Some(hash), dirty) => format!("{}{}", hash, if dirty == Some(true) { "-dirty" } else { "" }),
        (None, _) => "unknown-git-version".to_string(),
    };
}

/// One line describing this build, logged when a heap is created.
pub fn describe() -> String {
    format!(
        "mmtk-g1 {} ({}), features: [{}]",
        G1_PKG_VERSION, *G1_GIT_VERSION, G1_FEATURES
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_names_the_version() {
        let line = describe();
        assert!(line.starts_with("mmtk-g1 "));
        assert!(line.contains(G1_PKG_VERSION));
        assert!(!G1_GIT_VERSION.is_empty());
    }
}
