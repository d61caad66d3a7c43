use anyhow::{bail, Context};
use config::{Config, File, FileFormat};
use pdf_troubleshoot_core::AzureCredentials;
use serde::Deserialize;
use std::path::Path;

pub const CREDENTIALS_SECTION: &str = "ai-azure-test";

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    #[serde(rename = "ai-azure-test")]
    azure: AzureCredentials,
}

/// Flags/environment win; the credentials file fills whatever is missing.
pub fn resolve_azure_credentials(
    api_key: Option<String>,
    endpoint: Option<String>,
    credentials_path: &Path,
) -> anyhow::Result<AzureCredentials> {
    let credentials = match (api_key, endpoint) {
        (Some(azure_api_key), Some(azure_endpoint)) => AzureCredentials {
            azure_api_key,
            azure_endpoint,
        },
        (api_key, endpoint) => {
            let mut loaded = load_credentials_file(credentials_path)?;
            if let Some(api_key) = api_key {
                loaded.azure_api_key = api_key;
            }
            if let Some(endpoint) = endpoint {
                loaded.azure_endpoint = endpoint;
            }
            loaded
        }
    };

    if credentials.azure_api_key.trim().is_empty() {
        bail!("azure_api_key is empty");
    }
    if credentials.azure_endpoint.trim().is_empty() {
        bail!("azure_endpoint is empty");
    }
    Ok(credentials)
}

pub fn load_credentials_file(path: &Path) -> anyhow::Result<AzureCredentials> {
    let settings = Config::builder()
        .add_source(File::from(path).format(FileFormat::Ini))
        .build()
        .with_context(|| format!("failed to read azure credentials from {}", path.display()))?;

    let file: CredentialsFile = settings.try_deserialize().with_context(|| {
        format!(
            "{} must define [{CREDENTIALS_SECTION}] azure_api_key and azure_endpoint",
            path.display()
        )
    })?;
    Ok(file.azure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const INI: &str = "[ai-azure-test]\nazure_api_key = file-key\nazure_endpoint = https://example.cognitiveservices.azure.com/\n";

    #[test]
    fn credentials_file_is_parsed() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("azure.ini");
        fs::write(&path, INI)?;

        let credentials = load_credentials_file(&path)?;

        assert_eq!(credentials.azure_api_key, "file-key");
        assert_eq!(
            credentials.azure_endpoint,
            "https://example.cognitiveservices.azure.com/"
        );
        Ok(())
    }

    #[test]
    fn environment_values_override_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("azure.ini");
        fs::write(&path, INI)?;

        let credentials = resolve_azure_credentials(Some("env-key".to_string()), None, &path)?;

        assert_eq!(credentials.azure_api_key, "env-key");
        assert_eq!(
            credentials.azure_endpoint,
            "https://example.cognitiveservices.azure.com/"
        );
        Ok(())
    }

    #[test]
    fn complete_environment_skips_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let missing = dir.path().join("absent.ini");

        let credentials = resolve_azure_credentials(
            Some("env-key".to_string()),
            Some("https://env.example".to_string()),
            &missing,
        )?;

        assert_eq!(credentials.azure_endpoint, "https://env.example");
        Ok(())
    }

    #[test]
    fn missing_section_is_reported() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("azure.ini");
        fs::write(&path, "[other]\nazure_api_key = k\n")?;

        assert!(load_credentials_file(&path).is_err());
        assert!(resolve_azure_credentials(None, None, &dir.path().join("absent.ini")).is_err());
        Ok(())
    }
}
