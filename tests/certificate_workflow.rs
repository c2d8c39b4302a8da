use std::collections::HashSet;
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretBox;
use tempfile::TempDir;
use time::macros::date;
use time::OffsetDateTime;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use uuid::Uuid;

use training_portal::app_state::AppState;
use training_portal::certification::{
    ArtifactLocation, ArtifactRenderer, CertificateArtifact, DeliveryReceipt, HtmlFileRenderer,
    IneligibleReason, IssuanceSettings, NotificationMetadata, Notifier, NotifyError, RenderError,
};
use training_portal::crypto::FieldCipher;
use training_portal::db::models::{
    Actor, ApproveCertificate, AttendanceEntry, AttendanceStatus, AuditAction, AuditFilter, Batch,
    BulkMarkAttendance, CertificateStatus, DeliveryMode, MarkAttendance, NewBatch,
    NewCertificateTemplate, NewRegistration, PaymentMode, PaymentStatus, ProgramLevel, Region,
    RejectCertificate, RevokeCertificate, StaffMember, StaffRole, UpdatePayment,
};
use training_portal::db::store::{CertificateStore, RegistrationStore, StaffStore};
use training_portal::db::MemoryStore;
use training_portal::error::AppError;

const SESSION_DAY: time::Date = date!(2025 - 08 - 15);

struct FailingRenderer;

#[async_trait]
impl ArtifactRenderer for FailingRenderer {
    async fn render(&self, _artifact: &CertificateArtifact) -> Result<ArtifactLocation, RenderError> {
        Err(RenderError::Backend("renderer offline".to_string()))
    }
}

/// Holds every render until released, so other writes can land meanwhile.
#[derive(Default)]
struct PausedRenderer {
    started: Notify,
    release: Notify,
}

#[async_trait]
impl ArtifactRenderer for PausedRenderer {
    async fn render(&self, artifact: &CertificateArtifact) -> Result<ArtifactLocation, RenderError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(ArtifactLocation {
            file_name: format!("CERT-{}.html", artifact.certificate_number),
            url: format!("http://localhost/certificates/CERT-{}.html", artifact.certificate_number),
        })
    }
}

struct SlowRenderer;

#[async_trait]
impl ArtifactRenderer for SlowRenderer {
    async fn render(&self, artifact: &CertificateArtifact) -> Result<ArtifactLocation, RenderError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(ArtifactLocation {
            file_name: format!("CERT-{}.html", artifact.certificate_number),
            url: format!("http://localhost/certificates/CERT-{}.html", artifact.certificate_number),
        })
    }
}

#[derive(Default)]
struct CountingNotifier {
    sent: AtomicUsize,
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn notify(
        &self,
        recipient: &str,
        _artifact: &ArtifactLocation,
        _metadata: &NotificationMetadata,
    ) -> Result<DeliveryReceipt, NotifyError> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(DeliveryReceipt {
            recipient: recipient.to_string(),
            delivered_at: OffsetDateTime::now_utc(),
        })
    }
}

struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify(
        &self,
        _recipient: &str,
        _artifact: &ArtifactLocation,
        _metadata: &NotificationMetadata,
    ) -> Result<DeliveryReceipt, NotifyError> {
        Err(NotifyError::Delivery("smtp refused".to_string()))
    }
}

struct SlowNotifier;

#[async_trait]
impl Notifier for SlowNotifier {
    async fn notify(
        &self,
        recipient: &str,
        _artifact: &ArtifactLocation,
        _metadata: &NotificationMetadata,
    ) -> Result<DeliveryReceipt, NotifyError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(DeliveryReceipt {
            recipient: recipient.to_string(),
            delivered_at: OffsetDateTime::now_utc(),
        })
    }
}

struct Fixture {
    state: AppState,
    store: Arc<MemoryStore>,
    instructor: Actor,
    manager: Actor,
    batch: Batch,
    students: Vec<Uuid>,
    _dir: TempDir,
}

struct FixtureOptions {
    renderer: Option<Arc<dyn ArtifactRenderer>>,
    notifier: Arc<dyn Notifier>,
    render_timeout: Duration,
    students: usize,
    paid: bool,
    present: bool,
}

impl Default for FixtureOptions {
    fn default() -> Self {
        Self {
            renderer: None,
            notifier: Arc::new(CountingNotifier::default()),
            render_timeout: Duration::from_millis(200),
            students: 1,
            paid: true,
            present: true,
        }
    }
}

async fn seed_staff(store: &MemoryStore, name: &str, email: &str, role: StaffRole) -> Actor {
    let member = StaffMember {
        id: Uuid::now_v7(),
        full_name: name.to_string(),
        email: email.to_string(),
        role,
        created_at: OffsetDateTime::now_utc(),
    };
    store.insert_staff(&member).await.unwrap();
    Actor::new(member.id, role)
}

async fn fixture(options: FixtureOptions) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let renderer = options.renderer.unwrap_or_else(|| {
        Arc::new(HtmlFileRenderer::new(dir.path(), "http://localhost:8000"))
    });
    let settings = IssuanceSettings {
        client_url: "https://portal.example".to_string(),
        render_timeout: options.render_timeout,
        notify_timeout: Duration::from_millis(200),
        signature_secret: Some(SecretBox::new(Box::new("sign-me".to_string()))),
    };
    let state = AppState::new(
        store.clone(),
        Arc::new(FieldCipher::from_secret("workflow-tests")),
        renderer,
        options.notifier,
        settings,
    );

    let instructor =
        seed_staff(&store, "Sandeep Kumar", "sandeep@example.com", StaffRole::Instructor).await;
    let manager = seed_staff(&store, "Meera Rao", "meera@example.com", StaffRole::Management).await;

    let mut students = Vec::new();
    for i in 0..options.students {
        let registration = state
            .registrations
            .create(
                NewRegistration {
                    full_name: format!("Student {}", i),
                    email: format!("student{}@example.com", i),
                    phone: "+91 98765 43210".to_string(),
                    city_country: "Pune, India".to_string(),
                    region: Region::India,
                    program_level: ProgramLevel::Level1,
                    mode: DeliveryMode::Online,
                    referral_source: None,
                    referrer_name: None,
                    manual_date: Some(SESSION_DAY),
                },
                Some(instructor.id),
            )
            .await
            .unwrap();
        if options.paid {
            state
                .registrations
                .update_payment(
                    registration.id,
                    UpdatePayment {
                        payment_status: PaymentStatus::Paid,
                        payment_mode: Some(PaymentMode::Online),
                        transaction_id: Some(format!("TXN-{}", i)),
                    },
                )
                .await
                .unwrap();
        }
        students.push(registration.id);
    }

    let batch = state
        .batches
        .create(
            &instructor,
            NewBatch {
                program_level: ProgramLevel::Level1,
                start_date: SESSION_DAY,
                end_date: None,
                mode: None,
                max_students: None,
                total_sessions: Some(4),
                student_ids: students.clone(),
            },
        )
        .await
        .unwrap();

    if options.present && !students.is_empty() {
        state
            .attendance
            .mark_bulk(
                &instructor,
                BulkMarkAttendance {
                    batch_id: batch.id,
                    date: SESSION_DAY,
                    records: students
                        .iter()
                        .map(|id| AttendanceEntry {
                            registration_id: *id,
                            status: AttendanceStatus::Present,
                        })
                        .collect(),
                },
            )
            .await
            .unwrap();
    }

    Fixture {
        state,
        store,
        instructor,
        manager,
        batch,
        students,
        _dir: dir,
    }
}

fn without_batch(fx: &Fixture, student: usize) -> ApproveCertificate {
    ApproveCertificate {
        batch_id: None,
        ..approval(fx, student)
    }
}

/// Second batch under the same instructor; listed students move into it.
async fn second_batch(fx: &Fixture, students: Vec<Uuid>) -> Batch {
    fx.state
        .batches
        .create(
            &fx.instructor,
            NewBatch {
                program_level: ProgramLevel::Level1,
                start_date: date!(2025 - 09 - 01),
                end_date: None,
                mode: None,
                max_students: None,
                total_sessions: Some(4),
                student_ids: students,
            },
        )
        .await
        .unwrap()
}

async fn mark(fx: &Fixture, student: usize, batch: &Batch, day: time::Date, status: AttendanceStatus) {
    fx.state
        .attendance
        .mark_one(
            &fx.instructor,
            MarkAttendance {
                registration_id: fx.students[student],
                batch_id: batch.id,
                date: day,
                status,
            },
        )
        .await
        .unwrap();
}

fn approval(fx: &Fixture, student: usize) -> ApproveCertificate {
    ApproveCertificate {
        registration_id: fx.students[student],
        batch_id: Some(fx.batch.id),
        notes: None,
    }
}

#[tokio::test]
async fn approval_issues_numbered_certificate_and_delivers() {
    let fx = fixture(FixtureOptions::default()).await;

    let certificate = fx
        .state
        .certification
        .approve(&fx.manager, approval(&fx, 0))
        .await
        .unwrap();

    assert_eq!(certificate.certificate_number, "D1SK150825ON0001");
    assert_eq!(
        certificate.certificate_url,
        "http://localhost:8000/certificates/CERT-D1SK150825ON0001.html"
    );
    assert_eq!(
        certificate.validation_url,
        "https://portal.example/verify-certificate/D1SK150825ON0001"
    );
    assert!(certificate.digital_signature_hash.is_some());
    assert_eq!(certificate.issue_date.date(), SESSION_DAY);
    assert!(certificate.delivery.email_sent);
    assert_eq!(
        certificate.delivery.email_recipient.as_deref(),
        Some("student0@example.com")
    );

    let registration = fx.state.registrations.get(fx.students[0]).await.unwrap();
    assert_eq!(registration.certificate_status, CertificateStatus::Issued);
    assert!(registration.certificate_issued_at.is_some());

    let verification = fx
        .state
        .certification
        .verify("D1SK150825ON0001")
        .await
        .unwrap();
    assert!(verification.is_valid);
    assert_eq!(verification.student_name, "Student 0");
    assert_eq!(verification.approved_by, "Meera Rao");
    assert_eq!(verification.program_level, ProgramLevel::Level1);
    assert_eq!(verification.issue_date.date(), SESSION_DAY);

    assert!(fx._dir.path().join("CERT-D1SK150825ON0001.html").exists());
}

#[tokio::test]
async fn second_approval_is_a_conflict() {
    let fx = fixture(FixtureOptions::default()).await;
    fx.state
        .certification
        .approve(&fx.manager, approval(&fx, 0))
        .await
        .unwrap();

    let err = fx
        .state
        .certification
        .approve(&fx.manager, approval(&fx, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn unpaid_registration_is_not_eligible() {
    let fx = fixture(FixtureOptions {
        paid: false,
        ..FixtureOptions::default()
    })
    .await;

    let err = fx
        .state
        .certification
        .approve(&fx.manager, approval(&fx, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Eligibility(IneligibleReason::NotPaid)));
}

#[tokio::test]
async fn missing_attendance_is_not_eligible() {
    let fx = fixture(FixtureOptions {
        present: false,
        ..FixtureOptions::default()
    })
    .await;

    let err = fx
        .state
        .certification
        .approve(&fx.manager, approval(&fx, 0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::Eligibility(IneligibleReason::NoPresentMarks)
    ));
}

#[tokio::test]
async fn a_single_absence_blocks_approval() {
    let fx = fixture(FixtureOptions::default()).await;
    fx.state
        .attendance
        .mark_one(
            &fx.instructor,
            MarkAttendance {
                registration_id: fx.students[0],
                batch_id: fx.batch.id,
                date: date!(2025 - 08 - 16),
                status: AttendanceStatus::Absent,
            },
        )
        .await
        .unwrap();

    let err = fx
        .state
        .certification
        .approve(&fx.manager, approval(&fx, 0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::Eligibility(IneligibleReason::HasAbsentMarks)
    ));
}

#[tokio::test]
async fn render_failure_leaves_nothing_behind() {
    let fx = fixture(FixtureOptions {
        renderer: Some(Arc::new(FailingRenderer)),
        ..FixtureOptions::default()
    })
    .await;

    let err = fx
        .state
        .certification
        .approve(&fx.manager, approval(&fx, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ExternalService(_)));

    assert!(fx.store.list_certificates().await.unwrap().is_empty());
    let registration = fx.state.registrations.get(fx.students[0]).await.unwrap();
    assert_eq!(registration.certificate_status, CertificateStatus::Pending);
}

#[tokio::test]
async fn slow_renderer_times_out() {
    let fx = fixture(FixtureOptions {
        renderer: Some(Arc::new(SlowRenderer)),
        ..FixtureOptions::default()
    })
    .await;

    let err = fx
        .state
        .certification
        .approve(&fx.manager, approval(&fx, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ExternalService(_)));
    assert!(fx.store.list_certificates().await.unwrap().is_empty());
}

#[tokio::test]
async fn notification_failure_still_issues() {
    let fx = fixture(FixtureOptions {
        notifier: Arc::new(FailingNotifier),
        ..FixtureOptions::default()
    })
    .await;

    let certificate = fx
        .state
        .certification
        .approve(&fx.manager, approval(&fx, 0))
        .await
        .unwrap();
    assert!(!certificate.delivery.email_sent);
    assert!(certificate
        .delivery
        .email_error
        .as_deref()
        .unwrap()
        .contains("smtp refused"));

    let stored = fx
        .store
        .get_certificate(certificate.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.delivery, certificate.delivery);
}

#[tokio::test]
async fn slow_notifier_is_recorded_as_failed() {
    let fx = fixture(FixtureOptions {
        notifier: Arc::new(SlowNotifier),
        ..FixtureOptions::default()
    })
    .await;

    let certificate = fx
        .state
        .certification
        .approve(&fx.manager, approval(&fx, 0))
        .await
        .unwrap();
    assert_eq!(certificate.certificate_number, "D1SK150825ON0001");
    assert!(!certificate.delivery.email_sent);
}

#[tokio::test]
async fn resend_delivers_again() {
    let notifier = Arc::new(CountingNotifier::default());
    let fx = fixture(FixtureOptions {
        notifier: notifier.clone(),
        ..FixtureOptions::default()
    })
    .await;

    let certificate = fx
        .state
        .certification
        .approve(&fx.manager, approval(&fx, 0))
        .await
        .unwrap();
    let resent = fx
        .state
        .certification
        .resend_notification(certificate.id)
        .await
        .unwrap();

    assert!(resent.delivery.email_sent);
    assert_eq!(notifier.sent.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn concurrent_approvals_get_distinct_numbers() {
    let fx = fixture(FixtureOptions {
        students: 8,
        ..FixtureOptions::default()
    })
    .await;

    let mut tasks = JoinSet::new();
    for i in 0..fx.students.len() {
        let state = fx.state.clone();
        let manager = fx.manager;
        let request = approval(&fx, i);
        tasks.spawn(async move { state.certification.approve(&manager, request).await });
    }

    let mut numbers = HashSet::new();
    while let Some(joined) = tasks.join_next().await {
        let certificate = joined.unwrap().unwrap();
        assert!(numbers.insert(certificate.certificate_number));
    }

    let expected: HashSet<String> = (1..=8)
        .map(|seq| format!("D1SK150825ON{:04}", seq))
        .collect();
    assert_eq!(numbers, expected);
}

#[tokio::test]
async fn revoke_removes_certificate_and_records_reason() {
    let fx = fixture(FixtureOptions::default()).await;
    let certificate = fx
        .state
        .certification
        .approve(&fx.manager, approval(&fx, 0))
        .await
        .unwrap();

    let err = fx
        .state
        .certification
        .revoke(
            &fx.manager,
            RevokeCertificate {
                certificate_id: certificate.id,
                reason: "   ".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let registration = fx
        .state
        .certification
        .revoke(
            &fx.manager,
            RevokeCertificate {
                certificate_id: certificate.id,
                reason: "Issued in error".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(registration.certificate_status, CertificateStatus::Revoked);
    assert_eq!(
        registration.management_notes.as_deref(),
        Some("Revoked: Issued in error")
    );
    assert!(fx
        .state
        .certification
        .issued_certificates()
        .await
        .unwrap()
        .iter()
        .all(|issued| issued.certificate.id != certificate.id));

    let trail = fx
        .state
        .audit
        .list(&AuditFilter {
            action: Some(AuditAction::RevokeCertificate),
            ..AuditFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(trail.total, 1);
    assert_eq!(trail.entries[0].actor_id, fx.manager.id);
    assert_eq!(trail.entries[0].details["reason"], "Issued in error");
    assert_eq!(
        trail.entries[0].details["certificate_number"],
        certificate.certificate_number.as_str()
    );

    let err = fx
        .state
        .certification
        .verify(&certificate.certificate_number)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let err = fx
        .state
        .certification
        .approve(&fx.manager, approval(&fx, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn numbering_steps_past_revocation_gaps() {
    let fx = fixture(FixtureOptions {
        students: 4,
        ..FixtureOptions::default()
    })
    .await;

    let mut issued = Vec::new();
    for i in 0..3 {
        issued.push(
            fx.state
                .certification
                .approve(&fx.manager, approval(&fx, i))
                .await
                .unwrap(),
        );
    }
    fx.state
        .certification
        .revoke(
            &fx.manager,
            RevokeCertificate {
                certificate_id: issued[0].id,
                reason: "Duplicate enrolment".to_string(),
            },
        )
        .await
        .unwrap();

    let next = fx
        .state
        .certification
        .approve(&fx.manager, approval(&fx, 3))
        .await
        .unwrap();
    assert_eq!(next.certificate_number, "D1SK150825ON0004");
}

#[tokio::test]
async fn rejected_registration_cannot_be_approved() {
    let fx = fixture(FixtureOptions::default()).await;
    let registration = fx
        .state
        .certification
        .reject(
            &fx.manager,
            RejectCertificate {
                registration_id: fx.students[0],
                notes: Some("Incomplete coursework".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(registration.certificate_status, CertificateStatus::Rejected);

    let err = fx
        .state
        .certification
        .approve(&fx.manager, approval(&fx, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn eligibility_listing_and_statistics_follow_issuance() {
    let fx = fixture(FixtureOptions {
        students: 2,
        ..FixtureOptions::default()
    })
    .await;

    let eligible = fx.state.certification.eligible_registrations().await.unwrap();
    assert_eq!(eligible.len(), 2);
    assert!(eligible
        .iter()
        .all(|e| e.present == 1 && e.absent == 0 && e.batch_code.as_deref() == Some(fx.batch.batch_code.as_str())));

    fx.state
        .certification
        .approve(&fx.manager, approval(&fx, 0))
        .await
        .unwrap();

    let eligible = fx.state.certification.eligible_registrations().await.unwrap();
    assert_eq!(eligible.len(), 1);
    assert_eq!(eligible[0].registration.id, fx.students[1]);

    let stats = fx.state.certification.statistics().await.unwrap();
    assert_eq!(stats.total_registrations, 2);
    assert_eq!(stats.paid_registrations, 2);
    assert_eq!(stats.certificates_issued, 1);
    assert_eq!(stats.pending_approvals, 1);
    assert_eq!(stats.issuance_rate, 50.0);

    let issued = fx.state.certification.issued_certificates().await.unwrap();
    assert_eq!(issued.len(), 1);
    assert_eq!(issued[0].student_name.as_deref(), Some("Student 0"));
}

#[tokio::test]
async fn reject_during_render_wins_over_approval() {
    let renderer = Arc::new(PausedRenderer::default());
    let fx = fixture(FixtureOptions {
        renderer: Some(renderer.clone()),
        render_timeout: Duration::from_secs(5),
        ..FixtureOptions::default()
    })
    .await;

    let state = fx.state.clone();
    let manager = fx.manager;
    let request = approval(&fx, 0);
    let approving =
        tokio::spawn(async move { state.certification.approve(&manager, request).await });
    renderer.started.notified().await;

    fx.state
        .certification
        .reject(
            &fx.manager,
            RejectCertificate {
                registration_id: fx.students[0],
                notes: Some("Incomplete coursework".to_string()),
            },
        )
        .await
        .unwrap();
    fx.state
        .registrations
        .update_payment(
            fx.students[0],
            UpdatePayment {
                payment_status: PaymentStatus::Paid,
                payment_mode: None,
                transaction_id: Some("TXN-LATE".to_string()),
            },
        )
        .await
        .unwrap();
    renderer.release.notify_one();

    let err = approving.await.unwrap().unwrap_err();
    assert_eq!(err.code(), "conflict");

    let registration = fx.state.registrations.get(fx.students[0]).await.unwrap();
    assert_eq!(registration.certificate_status, CertificateStatus::Rejected);
    assert_eq!(
        registration.management_notes.as_deref(),
        Some("Incomplete coursework")
    );
    assert_eq!(registration.transaction_id.as_deref(), Some("TXN-LATE"));
    assert_eq!(registration.payment_mode, Some(PaymentMode::Online));
    assert!(registration.certificate_issued_at.is_none());
    assert!(fx.store.list_certificates().await.unwrap().is_empty());
}

#[tokio::test]
async fn registration_walks_from_unpaid_to_issued() {
    let fx = fixture(FixtureOptions {
        paid: false,
        present: false,
        ..FixtureOptions::default()
    })
    .await;

    let err = fx
        .state
        .certification
        .approve(&fx.manager, approval(&fx, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Eligibility(IneligibleReason::NotPaid)));

    fx.state
        .registrations
        .update_payment(
            fx.students[0],
            UpdatePayment {
                payment_status: PaymentStatus::Paid,
                payment_mode: Some(PaymentMode::Offline),
                transaction_id: None,
            },
        )
        .await
        .unwrap();
    let err = fx
        .state
        .certification
        .approve(&fx.manager, approval(&fx, 0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::Eligibility(IneligibleReason::NoPresentMarks)
    ));

    mark(&fx, 0, &fx.batch, SESSION_DAY, AttendanceStatus::Present).await;
    let certificate = fx
        .state
        .certification
        .approve(&fx.manager, approval(&fx, 0))
        .await
        .unwrap();
    assert_eq!(certificate.certificate_number, "D1SK150825ON0001");

    let err = fx
        .state
        .certification
        .approve(&fx.manager, approval(&fx, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(fx.store.list_certificates().await.unwrap().len(), 1);
}

#[tokio::test]
async fn approval_without_batch_judges_the_current_batch() {
    let fx = fixture(FixtureOptions::default()).await;
    let second = second_batch(&fx, vec![fx.students[0]]).await;
    mark(&fx, 0, &second, date!(2025 - 09 - 01), AttendanceStatus::Present).await;
    mark(&fx, 0, &second, date!(2025 - 09 - 02), AttendanceStatus::Absent).await;

    let err = fx
        .state
        .certification
        .approve(&fx.manager, without_batch(&fx, 0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::Eligibility(IneligibleReason::HasAbsentMarks)
    ));

    // Back in the first batch, the absence elsewhere no longer counts.
    let record = fx.store.get_registration(fx.students[0]).await.unwrap().unwrap();
    fx.store
        .set_registration_batch(fx.students[0], Some(fx.batch.id), record.assigned_instructor_id)
        .await
        .unwrap();

    let certificate = fx
        .state
        .certification
        .approve(&fx.manager, without_batch(&fx, 0))
        .await
        .unwrap();
    assert_eq!(certificate.certificate_number, "D1SK150825ON0001");
}

#[tokio::test]
async fn unbatched_student_is_judged_on_every_record() {
    let fx = fixture(FixtureOptions {
        students: 2,
        ..FixtureOptions::default()
    })
    .await;
    let second = second_batch(&fx, vec![fx.students[1]]).await;
    mark(&fx, 1, &second, date!(2025 - 09 - 01), AttendanceStatus::Absent).await;

    for id in &fx.students {
        let record = fx.store.get_registration(*id).await.unwrap().unwrap();
        fx.store
            .set_registration_batch(*id, None, record.assigned_instructor_id)
            .await
            .unwrap();
    }

    let err = fx
        .state
        .certification
        .approve(&fx.manager, without_batch(&fx, 1))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::Eligibility(IneligibleReason::HasAbsentMarks)
    ));

    let certificate = fx
        .state
        .certification
        .approve(&fx.manager, without_batch(&fx, 0))
        .await
        .unwrap();
    assert_eq!(certificate.registration_id, fx.students[0]);
}

#[tokio::test]
async fn active_template_shapes_the_certificate_file() {
    let fx = fixture(FixtureOptions::default()).await;
    fx.state
        .templates
        .create(
            &fx.manager,
            NewCertificateTemplate {
                name: "Gold seal".to_string(),
                html_content: "<h1>{{student_name}}</h1><p>{{certificate_number}}</p>".to_string(),
                activate: true,
            },
        )
        .await
        .unwrap();

    let certificate = fx
        .state
        .certification
        .approve(&fx.manager, approval(&fx, 0))
        .await
        .unwrap();

    let html = std::fs::read_to_string(
        fx._dir
            .path()
            .join(format!("CERT-{}.html", certificate.certificate_number)),
    )
    .unwrap();
    assert_eq!(html, "<h1>Student 0</h1><p>D1SK150825ON0001</p>");
}

#[tokio::test]
async fn batch_archive_zips_issued_certificates() {
    let fx = fixture(FixtureOptions {
        students: 3,
        ..FixtureOptions::default()
    })
    .await;

    let err = fx
        .state
        .certification
        .batch_archive(fx.batch.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    for i in 0..2 {
        fx.state
            .certification
            .approve(&fx.manager, approval(&fx, i))
            .await
            .unwrap();
    }

    let archive = fx
        .state
        .certification
        .batch_archive(fx.batch.id)
        .await
        .unwrap();
    assert_eq!(
        archive.file_name,
        format!("Batch-Certificates-{}.zip", fx.batch.batch_code)
    );

    let mut zip = zip::ZipArchive::new(Cursor::new(archive.bytes)).unwrap();
    assert_eq!(zip.len(), 2);
    let mut html = String::new();
    zip.by_name("CERT-D1SK150825ON0002.html")
        .unwrap()
        .read_to_string(&mut html)
        .unwrap();
    assert!(html.contains("D1SK150825ON0002"));

    let err = fx
        .state
        .certification
        .batch_archive(Uuid::now_v7())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
