use crate::entities::{link_type, IdentityLinkEntity, TaskEntity};
use crate::error::{EngineError, EngineResult};
use crate::event::{EngineEvent, EngineEventType};
use crate::persistence::{new_id, EntityKind, Predicate, Statement};
use crate::runtime::context::CommandContext;
use serde_json::Value;

const BY_TASK: Statement =
    Statement::new("selectIdentityLinksByTask", EntityKind::IdentityLink, &[Predicate::Eq("task_id")]);

const BY_PROCESS_INSTANCE: Statement = Statement::new(
    "selectIdentityLinksByProcessInstance",
    EntityKind::IdentityLink,
    &[Predicate::Eq("process_instance_id")],
);

const BY_PROCESS_INSTANCE_USER_TYPE: Statement = Statement::new(
    "selectIdentityLinkByProcessInstanceUserAndType",
    EntityKind::IdentityLink,
    &[Predicate::Eq("process_instance_id"), Predicate::Eq("user_id"), Predicate::Eq("link_type")],
);

const CANDIDATES_BY_USER: Statement = Statement::new(
    "selectTaskIdentityLinksByUserAndType",
    EntityKind::IdentityLink,
    &[Predicate::Eq("user_id"), Predicate::Eq("link_type"), Predicate::NotNull("task_id")],
);

const CANDIDATES_BY_GROUP: Statement = Statement::new(
    "selectTaskIdentityLinksByGroupAndType",
    EntityKind::IdentityLink,
    &[Predicate::Eq("group_id"), Predicate::Eq("link_type"), Predicate::NotNull("task_id")],
);

pub struct IdentityLinkManager<'a> {
    ctx: &'a mut CommandContext,
}

impl<'a> IdentityLinkManager<'a> {
    pub(crate) fn new(ctx: &'a mut CommandContext) -> Self {
        Self { ctx }
    }

    fn event(event_type: EngineEventType, link: &IdentityLinkEntity) -> EngineEvent {
        EngineEvent::entity(event_type, link)
            .with_execution(None, link.process_instance_id.as_deref())
            .with_payload(serde_json::json!({
                "type": link.link_type,
                "user_id": link.user_id,
                "group_id": link.group_id,
                "task_id": link.task_id,
            }))
    }

    fn insert(&mut self, link: &IdentityLinkEntity) -> EngineResult<()> {
        self.ctx.session().insert(link)?;
        self.ctx.history().record_identity_link_created(link)?;
        self.ctx.dispatch(Self::event(EngineEventType::EntityCreated, link))?;
        tracing::debug!(
            "🔗 Added {} link {:?}/{:?} to task {:?} / process {:?}",
            link.link_type,
            link.user_id,
            link.group_id,
            link.task_id,
            link.process_instance_id
        );
        Ok(())
    }

    pub async fn add_candidate_user(&mut self, task: &TaskEntity, user_id: &str) -> EngineResult<IdentityLinkEntity> {
        self.add_user_identity_link(task, user_id, link_type::CANDIDATE).await
    }

    pub fn add_candidate_group(&mut self, task: &TaskEntity, group_id: &str) -> EngineResult<IdentityLinkEntity> {
        self.add_group_identity_link(task, group_id, link_type::CANDIDATE)
    }

    /// Link a user to a task; the user also becomes a participant of the process instance
    pub async fn add_user_identity_link(
        &mut self,
        task: &TaskEntity,
        user_id: &str,
        link_type: &str,
    ) -> EngineResult<IdentityLinkEntity> {
        let link = IdentityLinkEntity {
            id: new_id(),
            revision: 1,
            link_type: link_type.to_string(),
            user_id: Some(user_id.to_string()),
            group_id: None,
            task_id: Some(task.id.clone()),
            process_instance_id: None,
            process_definition_id: None,
        };
        self.insert(&link)?;

        if let Some(process_instance_id) = &task.process_instance_id {
            self.involve_user(process_instance_id, user_id, link_type::PARTICIPANT)
                .await?;
        }
        Ok(link)
    }

    pub fn add_group_identity_link(
        &mut self,
        task: &TaskEntity,
        group_id: &str,
        link_type: &str,
    ) -> EngineResult<IdentityLinkEntity> {
        let link = IdentityLinkEntity {
            id: new_id(),
            revision: 1,
            link_type: link_type.to_string(),
            user_id: None,
            group_id: Some(group_id.to_string()),
            task_id: Some(task.id.clone()),
            process_instance_id: None,
            process_definition_id: None,
        };
        self.insert(&link)?;
        Ok(link)
    }

    /// Link a user to a process instance unless an identical link already exists
    pub async fn involve_user(
        &mut self,
        process_instance_id: &str,
        user_id: &str,
        link_type: &str,
    ) -> EngineResult<IdentityLinkEntity> {
        let params = [Value::from(process_instance_id), Value::from(user_id), Value::from(link_type)];
        if let Some(existing) = self
            .ctx
            .session()
            .select_one::<IdentityLinkEntity>(&BY_PROCESS_INSTANCE_USER_TYPE, &params)
            .await?
        {
            return Ok(existing);
        }

        let process_definition_id = self
            .ctx
            .session()
            .select_by_id::<crate::entities::ExecutionEntity>(process_instance_id)
            .await?
            .map(|execution| execution.process_definition_id);

        let link = IdentityLinkEntity {
            id: new_id(),
            revision: 1,
            link_type: link_type.to_string(),
            user_id: Some(user_id.to_string()),
            group_id: None,
            task_id: None,
            process_instance_id: Some(process_instance_id.to_string()),
            process_definition_id,
        };
        self.insert(&link)?;
        Ok(link)
    }

    // Finders

    pub async fn find_by_task_id(&mut self, task_id: &str) -> EngineResult<Vec<IdentityLinkEntity>> {
        self.ctx.session().select_list(&BY_TASK, &[Value::from(task_id)]).await
    }

    pub async fn find_by_process_instance_id(&mut self, process_instance_id: &str) -> EngineResult<Vec<IdentityLinkEntity>> {
        self.ctx
            .session()
            .select_list(&BY_PROCESS_INSTANCE, &[Value::from(process_instance_id)])
            .await
    }

    /// Links of a task matching user, group and type exactly (`None` matches absence)
    pub async fn find_by_task_user_group_type(
        &mut self,
        task_id: &str,
        user_id: Option<&str>,
        group_id: Option<&str>,
        link_type: &str,
    ) -> EngineResult<Vec<IdentityLinkEntity>> {
        Ok(self
            .find_by_task_id(task_id)
            .await?
            .into_iter()
            .filter(|link| {
                link.user_id.as_deref() == user_id
                    && link.group_id.as_deref() == group_id
                    && link.link_type == link_type
            })
            .collect())
    }

    pub async fn find_candidates_by_user(&mut self, user_id: &str) -> EngineResult<Vec<IdentityLinkEntity>> {
        self.ctx
            .session()
            .select_list(&CANDIDATES_BY_USER, &[Value::from(user_id), Value::from(link_type::CANDIDATE)])
            .await
    }

    pub async fn find_candidates_by_group(&mut self, group_id: &str) -> EngineResult<Vec<IdentityLinkEntity>> {
        self.ctx
            .session()
            .select_list(&CANDIDATES_BY_GROUP, &[Value::from(group_id), Value::from(link_type::CANDIDATE)])
            .await
    }

    // Deletion

    /// Remove matching task links and their history; returns how many were removed
    pub async fn delete_identity_link(
        &mut self,
        task: &TaskEntity,
        user_id: Option<&str>,
        group_id: Option<&str>,
        link_type: &str,
    ) -> EngineResult<usize> {
        if user_id.is_none() && group_id.is_none() {
            return Err(EngineError::IllegalArgument(
                "deleting an identity link requires a user or a group".to_string(),
            ));
        }

        let links = self
            .find_by_task_user_group_type(&task.id, user_id, group_id, link_type)
            .await?;
        for link in &links {
            self.delete(link, true).await?;
        }
        Ok(links.len())
    }

    /// Cascade from task deletion; historic links stay
    pub async fn delete_by_task(&mut self, task_id: &str) -> EngineResult<()> {
        for link in self.find_by_task_id(task_id).await? {
            self.delete(&link, false).await?;
        }
        Ok(())
    }

    /// Cascade from process instance deletion; historic links stay
    pub async fn delete_by_process_instance(&mut self, process_instance_id: &str) -> EngineResult<()> {
        for link in self.find_by_process_instance_id(process_instance_id).await? {
            self.delete(&link, false).await?;
        }
        Ok(())
    }

    async fn delete(&mut self, link: &IdentityLinkEntity, cascade_history: bool) -> EngineResult<()> {
        self.ctx.session().delete(link)?;
        if cascade_history {
            self.ctx.history().record_identity_link_deleted(&link.id).await?;
        }
        self.ctx.dispatch(Self::event(EngineEventType::EntityDeleted, link))
    }
}
