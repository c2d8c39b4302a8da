use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::db::models::{
    Attendance, AttendanceStatus, CertificateStatus, PaymentStatus, ProgramLevel, Registration,
};
use crate::db::repositories::RegistrationRepository;
use crate::db::store::{AttendanceStore, BatchStore, CertificateStore, Store};
use crate::error::AppResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IneligibleReason {
    NotPaid,
    AlreadyIssued,
    NoPresentMarks,
    HasAbsentMarks,
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            IneligibleReason::NotPaid => "Payment has not been completed",
            IneligibleReason::AlreadyIssued => "Certificate already issued for this program level",
            IneligibleReason::NoPresentMarks => "No \"Present\" attendance marks found",
            IneligibleReason::HasAbsentMarks => {
                "Student has \"Absent\" marks; full attendance is required for certification"
            }
        };
        f.write_str(message)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttendanceSummary {
    pub present: u64,
    pub absent: u64,
}

impl AttendanceSummary {
    pub fn from_records(records: &[Attendance]) -> Self {
        records.iter().fold(Self::default(), |mut summary, record| {
            match record.status {
                AttendanceStatus::Present => summary.present += 1,
                AttendanceStatus::Absent => summary.absent += 1,
            }
            summary
        })
    }
}

/// Attendance window used for a decision: a specific batch, or `None` for
/// every record of an unbatched student.
pub fn attendance_scope(explicit_batch: Option<Uuid>, registration: &Registration) -> Option<Uuid> {
    explicit_batch.or(registration.batch_id)
}

/// Strict gate: paid, not yet certified, at least one present and no absent
/// marks. Reasons are checked in declaration order.
pub fn evaluate(
    payment_status: PaymentStatus,
    certificate_exists: bool,
    attendance: AttendanceSummary,
) -> Result<(), IneligibleReason> {
    if payment_status != PaymentStatus::Paid {
        return Err(IneligibleReason::NotPaid);
    }
    if certificate_exists {
        return Err(IneligibleReason::AlreadyIssued);
    }
    if attendance.present == 0 {
        return Err(IneligibleReason::NoPresentMarks);
    }
    if attendance.absent > 0 {
        return Err(IneligibleReason::HasAbsentMarks);
    }
    Ok(())
}

/// Loads what [`evaluate`] needs for one registration and decides.
pub async fn check_registration(
    store: &dyn Store,
    registration: &Registration,
    program_level: ProgramLevel,
    explicit_batch: Option<Uuid>,
) -> AppResult<Result<(), IneligibleReason>> {
    let existing = store
        .find_certificate_for(registration.id, program_level)
        .await?;
    let records = store
        .attendance_for(registration.id, attendance_scope(explicit_batch, registration))
        .await?;

    Ok(evaluate(
        registration.payment_status,
        existing.is_some(),
        AttendanceSummary::from_records(&records),
    ))
}

#[derive(Debug, Clone, Serialize)]
pub struct EligibleRegistration {
    #[serde(flatten)]
    pub registration: Registration,
    pub batch_code: Option<String>,
    pub present: i64,
    pub absent: i64,
}

/// Paid, pending registrations in a batch whose batch attendance is clean.
pub async fn eligible_registrations(
    registrations: &RegistrationRepository,
    store: &dyn Store,
) -> AppResult<Vec<EligibleRegistration>> {
    let tallies: HashMap<(Uuid, Uuid), (i64, i64)> = store
        .attendance_tallies()
        .await?
        .into_iter()
        .filter_map(|t| t.batch_id.map(|batch| ((t.registration_id, batch), (t.present, t.absent))))
        .collect();

    let certified: HashSet<(Uuid, ProgramLevel)> = store
        .list_certificates()
        .await?
        .into_iter()
        .map(|c| (c.registration_id, c.program_level))
        .collect();

    let batch_codes: HashMap<Uuid, String> = store
        .list_batches()
        .await?
        .into_iter()
        .map(|b| (b.id, b.batch_code))
        .collect();

    let eligible = registrations
        .list()
        .await?
        .into_iter()
        .filter(|r| {
            r.payment_status == PaymentStatus::Paid
                && r.certificate_status == CertificateStatus::Pending
                && !certified.contains(&(r.id, r.program_level))
        })
        .filter_map(|registration| {
            let batch_id = registration.batch_id?;
            let (present, absent) = tallies.get(&(registration.id, batch_id)).copied()?;
            if present == 0 || absent > 0 {
                return None;
            }
            Some(EligibleRegistration {
                batch_code: batch_codes.get(&batch_id).cloned(),
                registration,
                present,
                absent,
            })
        })
        .collect();

    Ok(eligible)
}
