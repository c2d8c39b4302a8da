//! Certificate eligibility, numbering and issuance.

pub mod eligibility;
pub mod issuance;
pub mod locks;
pub mod notifier;
pub mod numbering;
pub mod renderer;

pub use eligibility::{EligibleRegistration, IneligibleReason};
pub use issuance::{CertificationService, CertificationStatistics, IssuanceSettings};
pub use locks::{SequenceGuard, SequenceLocks};
pub use notifier::{
    DeliveryReceipt, LogNotifier, NotificationMetadata, Notifier, NotifyError, SmtpNotifier,
};
pub use renderer::{
    fill_layout, ArtifactLocation, ArtifactRenderer, CertificateArtifact, HtmlFileRenderer,
    RenderError,
};
