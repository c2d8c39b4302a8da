use std::sync::Arc;

use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::db::models::{Actor, CertificateTemplate, NewCertificateTemplate};
use crate::db::store::{Store, TemplateStore};
use crate::db::DatabaseError;
use crate::error::{AppError, AppResult};

/// Certificate layouts uploaded by management. The active one is used for
/// every certificate rendered after it is activated.
#[derive(Clone)]
pub struct TemplateRepository {
    store: Arc<dyn Store>,
}

impl TemplateRepository {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create(
        &self,
        actor: &Actor,
        new: NewCertificateTemplate,
    ) -> AppResult<CertificateTemplate> {
        new.validate()?;

        let template = CertificateTemplate {
            id: Uuid::now_v7(),
            name: new.name.trim().to_string(),
            html_content: new.html_content,
            is_active: new.activate,
            created_by: Some(actor.id),
            created_at: OffsetDateTime::now_utc(),
        };
        self.store.insert_template(&template).await?;

        info!(template = %template.name, active = template.is_active, "Certificate template created");
        Ok(template)
    }

    pub async fn list(&self) -> AppResult<Vec<CertificateTemplate>> {
        Ok(self.store.list_templates().await?)
    }

    pub async fn activate(&self, id: Uuid) -> AppResult<CertificateTemplate> {
        let template = self.store.activate_template(id).await.map_err(|e| match e {
            DatabaseError::NotFound => AppError::not_found("Template"),
            other => other.into(),
        })?;
        info!(template = %template.name, "Certificate template activated");
        Ok(template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::StaffRole;
    use crate::db::MemoryStore;

    fn new_template(name: &str, activate: bool) -> NewCertificateTemplate {
        NewCertificateTemplate {
            name: name.to_string(),
            html_content: "<p>{{student_name}} {{certificate_number}}</p>".to_string(),
            activate,
        }
    }

    #[tokio::test]
    async fn only_one_template_is_active() {
        let store = Arc::new(MemoryStore::new());
        let templates = TemplateRepository::new(store.clone());
        let actor = Actor::new(Uuid::now_v7(), StaffRole::Management);

        let first = templates.create(&actor, new_template("Classic", true)).await.unwrap();
        let second = templates.create(&actor, new_template("Modern", false)).await.unwrap();
        assert_eq!(store.active_template().await.unwrap().unwrap().id, first.id);

        templates.activate(second.id).await.unwrap();
        let listed = templates.list().await.unwrap();
        assert_eq!(listed.iter().filter(|t| t.is_active).count(), 1);
        assert_eq!(store.active_template().await.unwrap().unwrap().id, second.id);
    }

    #[tokio::test]
    async fn duplicate_name_and_unknown_id_are_reported() {
        let templates = TemplateRepository::new(Arc::new(MemoryStore::new()));
        let actor = Actor::new(Uuid::now_v7(), StaffRole::Management);

        templates.create(&actor, new_template("Classic", false)).await.unwrap();
        let err = templates
            .create(&actor, new_template("Classic", false))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "conflict");

        let err = templates.activate(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
