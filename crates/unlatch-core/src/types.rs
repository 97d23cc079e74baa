use serde::{Deserialize, Serialize};

/// A decryptable file discovered at a source location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Opaque storage identifier (object path for OpenDAL backends)
    pub id: String,
    /// Display name; the correlation key for results within a job
    pub name: String,
    /// Size in bytes as reported by the listing
    pub size: u64,
}

impl SourceFile {
    pub fn new(id: impl Into<String>, name: impl Into<String>, size: u64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            size,
        }
    }
}

/// Where the encrypted files of a job come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A folder in the remote file store
    RemoteFolder,
    /// Files staged by the caller before the job was created
    LocalUpload,
}

/// Where decrypted output goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    /// Upload plaintext to a folder in the remote file store
    RemoteFolder,
    /// Retain plaintext as a downloadable artifact
    ClientDownload,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::RemoteFolder => write!(f, "remote-folder"),
            SourceKind::LocalUpload => write!(f, "local-upload"),
        }
    }
}

impl std::fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DestinationKind::RemoteFolder => write!(f, "remote-folder"),
            DestinationKind::ClientDownload => write!(f, "client-download"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_snake_case() {
        #[derive(Serialize)]
        struct Wrap {
            source: SourceKind,
            dest: DestinationKind,
        }
        let s = toml::to_string(&Wrap {
            source: SourceKind::LocalUpload,
            dest: DestinationKind::ClientDownload,
        })
        .unwrap();
        assert!(s.contains("source = \"local_upload\""));
        assert!(s.contains("dest = \"client_download\""));
    }

    #[test]
    fn kinds_display_with_dashes() {
        assert_eq!(SourceKind::RemoteFolder.to_string(), "remote-folder");
        assert_eq!(DestinationKind::ClientDownload.to_string(), "client-download");
    }
}
