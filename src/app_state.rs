use std::sync::Arc;

use secrecy::SecretBox;
use tracing::{info, warn};

use crate::attendance::AttendanceLedger;
use crate::audit::AuditTrail;
use crate::certification::{
    ArtifactRenderer, CertificationService, HtmlFileRenderer, IssuanceSettings, LogNotifier,
    Notifier, SequenceLocks, SmtpNotifier,
};
use crate::config::Config;
use crate::crypto::FieldCipher;
use crate::db::repositories::{
    BatchRepository, NoteRepository, RegistrationRepository, TemplateRepository,
};
use crate::db::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub registrations: RegistrationRepository,
    pub batches: BatchRepository,
    pub attendance: AttendanceLedger,
    pub notes: NoteRepository,
    pub templates: TemplateRepository,
    pub audit: AuditTrail,
    pub certification: Arc<CertificationService>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        cipher: Arc<FieldCipher>,
        renderer: Arc<dyn ArtifactRenderer>,
        notifier: Arc<dyn Notifier>,
        settings: IssuanceSettings,
    ) -> Self {
        let locks = Arc::new(SequenceLocks::new());
        let registrations = RegistrationRepository::new(store.clone(), cipher);
        let batches = BatchRepository::new(store.clone(), registrations.clone(), locks.clone());
        let attendance = AttendanceLedger::new(store.clone(), registrations.clone());
        let notes = NoteRepository::new(store.clone(), registrations.clone());
        let templates = TemplateRepository::new(store.clone());
        let audit = AuditTrail::new(store.clone());
        let certification = Arc::new(CertificationService::new(
            store.clone(),
            registrations.clone(),
            renderer,
            notifier,
            locks,
            settings,
        ));

        Self {
            store,
            registrations,
            batches,
            attendance,
            notes,
            templates,
            audit,
            certification,
        }
    }

    /// Wires the HTML renderer and the SMTP notifier from configuration.
    /// Without a mail relay, notifications are logged and recorded as not
    /// sent.
    pub fn from_config(store: Arc<dyn Store>, config: &Config) -> Self {
        let cipher = Arc::new(FieldCipher::from_secret(config.security.encryption_key()));
        let renderer: Arc<dyn ArtifactRenderer> = Arc::new(HtmlFileRenderer::new(
            config.certificates.output_dir.clone(),
            config.app.server_url.clone(),
        ));
        let notifier = notifier_from_config(config, renderer.clone());
        let settings = IssuanceSettings {
            client_url: config.app.client_url.clone(),
            render_timeout: config.certificates.render_timeout,
            notify_timeout: config.certificates.notify_timeout,
            signature_secret: config
                .security
                .signature_secret()
                .map(|secret| SecretBox::new(Box::new(secret.to_string()))),
        };

        Self::new(store, cipher, renderer, notifier, settings)
    }
}

fn notifier_from_config(config: &Config, renderer: Arc<dyn ArtifactRenderer>) -> Arc<dyn Notifier> {
    if !config.mail.is_configured() {
        warn!("SMTP_HOST or MAIL_FROM not set; certificate mail will be logged, not sent");
        return Arc::new(LogNotifier);
    }

    match SmtpNotifier::new(&config.mail, config.app.name.clone(), Some(renderer)) {
        Ok(notifier) => {
            info!(
                host = config.mail.smtp_host.as_deref().unwrap_or_default(),
                port = config.mail.smtp_port,
                "Certificate mail goes through SMTP"
            );
            Arc::new(notifier)
        }
        Err(e) => {
            warn!(error = %e, "SMTP notifier unavailable; certificate mail will be logged, not sent");
            Arc::new(LogNotifier)
        }
    }
}
