use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Trackable event kinds across all platform services.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // ===== Authentication =====
    /// User requested a login code.
    AuthLoginAttempt {
        actor_id: Option<Uuid>,
        email: String,
        success: bool,
        error: Option<String>,
    },

    /// User verified a login code.
    AuthCodeVerified {
        actor_id: Uuid,
        success: bool,
        error: Option<String>,
    },

    /// Token refresh attempt.
    AuthTokenRefresh {
        actor_id: Uuid,
        success: bool,
        error: Option<String>,
    },

    /// Session validation.
    AuthSessionValidated { actor_id: Uuid, valid: bool },

    // ===== Task lifecycle =====
    /// Task created.
    TaskCreated {
        task_id: Uuid,
        actor_id: Uuid,
        project_id: Option<Uuid>,
        command: String,
    },

    /// Task started execution.
    TaskStarted { task_id: Uuid, actor_id: Uuid },

    /// Task completed successfully.
    TaskCompleted {
        task_id: Uuid,
        actor_id: Uuid,
        duration_ms: i64,
        exit_code: i32,
    },

    /// Task failed.
    TaskFailed {
        task_id: Uuid,
        actor_id: Uuid,
        duration_ms: Option<i64>,
        exit_code: Option<i32>,
        error: String,
    },

    /// Task cancelled by the user.
    TaskCancelled {
        task_id: Uuid,
        actor_id: Uuid,
        duration_ms: Option<i64>,
    },

    // ===== Integrations =====
    /// Integration connected.
    IntegrationConnected {
        integration_id: Uuid,
        actor_id: Uuid,
        provider: String,
        project_id: Option<Uuid>,
    },

    /// Integration disconnected.
    IntegrationDisconnected {
        integration_id: Uuid,
        actor_id: Uuid,
        provider: String,
        reason: Option<String>,
    },

    /// Integration used.
    IntegrationUsed {
        integration_id: Uuid,
        actor_id: Uuid,
        provider: String,
        action: String,
    },

    /// Integration error occurred.
    IntegrationError {
        integration_id: Uuid,
        actor_id: Uuid,
        provider: String,
        error: String,
    },

    /// OAuth flow started.
    OauthFlowStarted {
        actor_id: Uuid,
        provider: String,
        state: String,
    },

    /// OAuth flow completed.
    OauthFlowCompleted {
        actor_id: Uuid,
        provider: String,
        success: bool,
        error: Option<String>,
    },

    // ===== Webhooks =====
    /// Webhook received.
    WebhookReceived {
        integration_id: Option<Uuid>,
        provider: String,
        event_kind: String,
        delivery_id: String,
    },

    /// Webhook processing completed.
    WebhookProcessed {
        integration_id: Option<Uuid>,
        provider: String,
        event_kind: String,
        delivery_id: String,
        success: bool,
        duration_ms: i64,
        error: Option<String>,
    },

    // ===== Projects =====
    /// Project created.
    ProjectCreated {
        project_id: Uuid,
        actor_id: Uuid,
        name: String,
    },

    /// Project updated.
    ProjectUpdated { project_id: Uuid, actor_id: Uuid },

    /// Project deleted.
    ProjectDeleted { project_id: Uuid, actor_id: Uuid },

    // ===== API requests =====
    /// API request served.
    ApiRequest {
        service: String,
        endpoint: String,
        method: String,
        status_code: u16,
        duration_ms: i64,
        actor_id: Option<Uuid>,
    },

    // ===== Database queries =====
    /// Database query executed.
    DatabaseQuery {
        service: String,
        query_kind: String,
        duration_ms: i64,
        rows_affected: Option<i64>,
    },

    // ===== Errors =====
    /// Application error occurred.
    ApplicationError {
        service: String,
        error_kind: String,
        error_message: String,
        actor_id: Option<Uuid>,
        context: Option<Value>,
    },
}

impl Event {
    /// Stable string name of the event kind (the `type` discriminant).
    pub fn kind(&self) -> &'static str {
        match self {
            Event::AuthLoginAttempt { .. } => "auth_login_attempt",
            Event::AuthCodeVerified { .. } => "auth_code_verified",
            Event::AuthTokenRefresh { .. } => "auth_token_refresh",
            Event::AuthSessionValidated { .. } => "auth_session_validated",
            Event::TaskCreated { .. } => "task_created",
            Event::TaskStarted { .. } => "task_started",
            Event::TaskCompleted { .. } => "task_completed",
            Event::TaskFailed { .. } => "task_failed",
            Event::TaskCancelled { .. } => "task_cancelled",
            Event::IntegrationConnected { .. } => "integration_connected",
            Event::IntegrationDisconnected { .. } => "integration_disconnected",
            Event::IntegrationUsed { .. } => "integration_used",
            Event::IntegrationError { .. } => "integration_error",
            Event::OauthFlowStarted { .. } => "oauth_flow_started",
            Event::OauthFlowCompleted { .. } => "oauth_flow_completed",
            Event::WebhookReceived { .. } => "webhook_received",
            Event::WebhookProcessed { .. } => "webhook_processed",
            Event::ProjectCreated { .. } => "project_created",
            Event::ProjectUpdated { .. } => "project_updated",
            Event::ProjectDeleted { .. } => "project_deleted",
            Event::ApiRequest { .. } => "api_request",
            Event::DatabaseQuery { .. } => "database_query",
            Event::ApplicationError { .. } => "application_error",
        }
    }

    /// Service named by the event itself, if any.
    pub fn service(&self) -> Option<&str> {
        match self {
            Event::ApiRequest { service, .. } => Some(service),
            Event::DatabaseQuery { service, .. } => Some(service),
            Event::ApplicationError { service, .. } => Some(service),
            _ => None,
        }
    }

    /// Acting user, if the event names one.
    pub fn actor_id(&self) -> Option<Uuid> {
        match self {
            Event::AuthLoginAttempt { actor_id, .. } => *actor_id,
            Event::AuthCodeVerified { actor_id, .. } => Some(*actor_id),
            Event::AuthTokenRefresh { actor_id, .. } => Some(*actor_id),
            Event::AuthSessionValidated { actor_id, .. } => Some(*actor_id),
            Event::TaskCreated { actor_id, .. } => Some(*actor_id),
            Event::TaskStarted { actor_id, .. } => Some(*actor_id),
            Event::TaskCompleted { actor_id, .. } => Some(*actor_id),
            Event::TaskFailed { actor_id, .. } => Some(*actor_id),
            Event::TaskCancelled { actor_id, .. } => Some(*actor_id),
            Event::IntegrationConnected { actor_id, .. } => Some(*actor_id),
            Event::IntegrationDisconnected { actor_id, .. } => Some(*actor_id),
            Event::IntegrationUsed { actor_id, .. } => Some(*actor_id),
            Event::IntegrationError { actor_id, .. } => Some(*actor_id),
            Event::OauthFlowStarted { actor_id, .. } => Some(*actor_id),
            Event::OauthFlowCompleted { actor_id, .. } => Some(*actor_id),
            Event::WebhookReceived { .. } => None,
            Event::WebhookProcessed { .. } => None,
            Event::ProjectCreated { actor_id, .. } => Some(*actor_id),
            Event::ProjectUpdated { actor_id, .. } => Some(*actor_id),
            Event::ProjectDeleted { actor_id, .. } => Some(*actor_id),
            Event::ApiRequest { actor_id, .. } => *actor_id,
            Event::DatabaseQuery { .. } => None,
            Event::ApplicationError { actor_id, .. } => *actor_id,
        }
    }

    /// Kind-specific fields as an open payload map (the `type` discriminant
    /// is stored separately by the pipeline and stripped here).
    pub fn payload(&self) -> Map<String, Value> {
        let mut map = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            // Serialization of a tagged struct enum always yields an object.
            _ => Map::new(),
        };
        map.remove("type");
        map
    }
}

/// Event plus the metadata stamped at enrichment time.
///
/// Created by the producer client, owned by the ingestion queue until the
/// batch worker consumes it into a bulk write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedEvent {
    pub timestamp: DateTime<Utc>,
    /// Originating service: the event's own service field when it carries
    /// one (gateway-emitted events name their upstream), else the emitting
    /// client's configured identity.
    pub service: String,
    pub actor_id: Option<Uuid>,
    pub event: Event,
}

impl EnrichedEvent {
    pub fn new(event: Event, default_service: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            service: event
                .service()
                .unwrap_or(default_service)
                .to_string(),
            actor_id: event.actor_id(),
            event,
        }
    }

    /// Same enrichment with a caller-chosen timestamp (tests, replays).
    pub fn at(event: Event, default_service: &str, timestamp: DateTime<Utc>) -> Self {
        let mut enriched = Self::new(event, default_service);
        enriched.timestamp = timestamp;
        enriched
    }

    pub fn kind(&self) -> &'static str {
        self.event.kind()
    }

    pub fn payload(&self) -> Map<String, Value> {
        self.event.payload()
    }
}
