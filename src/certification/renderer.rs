use std::io::ErrorKind;
use std::path::PathBuf;

use askama::Template;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Everything printed on a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateArtifact {
    pub student_name: String,
    pub program_label: String,
    pub date_label: String,
    pub city: String,
    pub trainer_name: String,
    pub certificate_number: String,
    pub verification_url: String,
    /// Active management layout; the built-in page when `None`.
    #[serde(skip)]
    pub layout_html: Option<String>,
}

impl CertificateArtifact {
    /// Value for a `{{name}}` placeholder in a stored layout.
    pub fn placeholder(&self, name: &str) -> Option<&str> {
        let value = match name {
            "student_name" => &self.student_name,
            "program" => &self.program_label,
            "date" => &self.date_label,
            "city" => &self.city,
            "trainer_name" => &self.trainer_name,
            "certificate_number" => &self.certificate_number,
            "verification_url" => &self.verification_url,
            _ => return None,
        };
        Some(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    pub file_name: String,
    pub url: String,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template rendering failed: {0}")]
    Template(#[from] askama::Error),

    #[error("failed to write certificate: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Backend(String),
}

#[async_trait]
pub trait ArtifactRenderer: Send + Sync {
    async fn render(&self, artifact: &CertificateArtifact) -> Result<ArtifactLocation, RenderError>;

    /// Bytes of a previously rendered artifact, `None` when it is gone or
    /// the backend keeps no copy.
    async fn read_artifact(&self, _file_name: &str) -> Result<Option<Vec<u8>>, RenderError> {
        Ok(None)
    }
}

/// File name for a certificate artifact with the given extension.
pub fn artifact_file_name(certificate_number: &str, extension: &str) -> String {
    format!("CERT-{}.{}", certificate_number, extension)
}

#[derive(Template)]
#[template(path = "certificate.html")]
struct DefaultCertificatePage<'a> {
    artifact: &'a CertificateArtifact,
}

#[derive(Template)]
#[template(source = "{{ value }}", ext = "html")]
struct EscapedValue<'a> {
    value: &'a str,
}

/// Fills `{{name}}` placeholders of a stored layout with HTML-escaped
/// values in one pass. Unknown placeholders are left as written.
pub fn fill_layout(layout: &str, artifact: &CertificateArtifact) -> Result<String, RenderError> {
    let mut out = String::with_capacity(layout.len());
    let mut rest = layout;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };

        match artifact.placeholder(after[..end].trim()) {
            Some(value) => out.push_str(&EscapedValue { value }.render()?),
            None => out.push_str(&rest[start..start + end + 4]),
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && name != "." && name != ".."
}

/// Writes an HTML certificate per issuance into `output_dir`, which is
/// served under `<public_base_url>/certificates/`.
#[derive(Debug, Clone)]
pub struct HtmlFileRenderer {
    output_dir: PathBuf,
    public_base_url: String,
}

impl HtmlFileRenderer {
    pub fn new(output_dir: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ArtifactRenderer for HtmlFileRenderer {
    async fn render(&self, artifact: &CertificateArtifact) -> Result<ArtifactLocation, RenderError> {
        let html = match &artifact.layout_html {
            Some(layout) => fill_layout(layout, artifact)?,
            None => DefaultCertificatePage { artifact }.render()?,
        };

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let file_name = artifact_file_name(&artifact.certificate_number, "html");
        let path = self.output_dir.join(&file_name);
        tokio::fs::write(&path, html).await?;

        debug!(path = %path.display(), "Certificate written");

        Ok(ArtifactLocation {
            url: format!("{}/certificates/{}", self.public_base_url, file_name),
            file_name,
        })
    }

    async fn read_artifact(&self, file_name: &str) -> Result<Option<Vec<u8>>, RenderError> {
        if !is_plain_file_name(file_name) {
            return Ok(None);
        }
        match tokio::fs::read(self.output_dir.join(file_name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact() -> CertificateArtifact {
        CertificateArtifact {
            student_name: "Asha <Verma>".to_string(),
            program_label: "Level 1".to_string(),
            date_label: "15 August 2025".to_string(),
            city: "Pune".to_string(),
            trainer_name: "Sonia Kapoor".to_string(),
            certificate_number: "D1SK150825ON0001".to_string(),
            verification_url: "http://localhost:3000/verify-certificate/D1SK150825ON0001".to_string(),
            layout_html: None,
        }
    }

    #[tokio::test]
    async fn writes_html_into_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = HtmlFileRenderer::new(dir.path().join("certs"), "http://localhost:8000/");

        let location = renderer.render(&artifact()).await.unwrap();

        assert_eq!(location.file_name, "CERT-D1SK150825ON0001.html");
        assert_eq!(
            location.url,
            "http://localhost:8000/certificates/CERT-D1SK150825ON0001.html"
        );

        let html = std::fs::read_to_string(dir.path().join("certs").join(&location.file_name)).unwrap();
        assert!(html.contains("D1SK150825ON0001"));
        assert!(html.contains("Sonia Kapoor"));
        assert!(html.contains("Asha &lt;Verma&gt;"));
    }

    #[tokio::test]
    async fn stored_layout_is_filled_and_escaped() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = HtmlFileRenderer::new(dir.path(), "http://localhost:8000");
        let artifact = CertificateArtifact {
            layout_html: Some(
                "<h1>{{ student_name }}</h1><p>{{certificate_number}}</p><i>{{unknown}}</i>"
                    .to_string(),
            ),
            ..artifact()
        };

        let location = renderer.render(&artifact).await.unwrap();
        let bytes = renderer.read_artifact(&location.file_name).await.unwrap().unwrap();
        let html = String::from_utf8(bytes).unwrap();

        assert_eq!(
            html,
            "<h1>Asha &lt;Verma&gt;</h1><p>D1SK150825ON0001</p><i>{{unknown}}</i>"
        );
    }

    #[test]
    fn placeholder_values_are_not_expanded_again() {
        let artifact = CertificateArtifact {
            student_name: "{{certificate_number}}".to_string(),
            ..artifact()
        };
        let html = fill_layout("{{student_name}} {{certificate_number", &artifact).unwrap();
        assert_eq!(html, "{{certificate_number}} {{certificate_number");
    }

    #[tokio::test]
    async fn read_artifact_stays_inside_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("secret.txt"), "x").unwrap();
        let renderer = HtmlFileRenderer::new(dir.path().join("certs"), "http://localhost:8000");

        assert!(renderer.read_artifact("../secret.txt").await.unwrap().is_none());
        assert!(renderer.read_artifact("CERT-MISSING.html").await.unwrap().is_none());
    }
}
