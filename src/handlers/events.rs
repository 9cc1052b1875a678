use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{can_manage_event, Access, AuthenticatedUser};
use crate::cache::CacheKey;
use crate::db::{Event, EventFields, EventStatus, EventWithOrganizer};
use crate::error::{AppError, FieldErrors};
use crate::handlers::{
    cached, max_length, non_negative, ordered, parse_choice, require, require_text, Pagination,
    EVENTS_PER_PAGE,
};
use crate::reminders::ReminderJob;
use crate::storage::{is_allowed_poster, ObjectStorage, ALLOWED_POSTER_EXTENSIONS};
use crate::AppState;

const EVENT_NOT_FOUND: &str = "Event not found.";
const FORM_FIELD_LIMIT: usize = 1024;

#[derive(Debug, Deserialize)]
pub struct EventListQuery {
    pub page: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EventRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: Option<String>,
    pub quota: Option<i64>,
    pub category: Option<String>,
    pub organizer_id: Option<Uuid>,
}

impl EventRequest {
    /// Field checks that need no database access.
    fn validate(self) -> Result<EventFields, AppError> {
        let mut errors = FieldErrors::new();

        require_text(&mut errors, "name", self.name.as_deref());
        max_length(&mut errors, "name", self.name.as_deref(), 255);
        require_text(&mut errors, "location", self.location.as_deref());
        max_length(&mut errors, "location", self.location.as_deref(), 255);
        require_text(&mut errors, "category", self.category.as_deref());
        max_length(&mut errors, "category", self.category.as_deref(), 100);
        let start_time = require(&mut errors, "start_time", &self.start_time).copied();
        let end_time = require(&mut errors, "end_time", &self.end_time).copied();
        ordered(&mut errors, start_time, end_time, "end_time", "End time must be after start time.");
        let quota = require(&mut errors, "quota", &self.quota).copied();
        non_negative(&mut errors, "quota", quota);
        if matches!(quota, Some(q) if q > i64::from(i32::MAX)) {
            errors.add("quota", format!("Ensure this value is less than or equal to {}.", i32::MAX));
        }
        let status = match self.status.as_deref() {
            None => Some(EventStatus::Scheduled),
            Some(raw) => parse_choice(&mut errors, "status", Some(raw)),
        };
        let organizer_id = require(&mut errors, "organizer_id", &self.organizer_id).copied();

        errors.into_result()?;

        // Every value below was checked for presence above.
        Ok(EventFields {
            name: self.name.unwrap_or_default().trim().to_string(),
            description: self.description.unwrap_or_default(),
            location: self.location.unwrap_or_default().trim().to_string(),
            start_time: start_time.unwrap_or_default(),
            end_time: end_time.unwrap_or_default(),
            status: status.unwrap_or(EventStatus::Scheduled),
            quota: quota.and_then(|q| i32::try_from(q).ok()).unwrap_or_default(),
            category: self.category.unwrap_or_default().trim().to_string(),
            organizer_id: organizer_id.unwrap_or_default(),
        })
    }
}

async fn validated_fields(state: &AppState, payload: EventRequest) -> Result<EventFields, AppError> {
    let fields = payload.validate()?;
    if !state.db.user_exists(fields.organizer_id).await? {
        return Err(AppError::field("organizer_id", "Organizer not found."));
    }
    Ok(fields)
}

/// The shape returned right after creation.
fn event_summary(event: &Event) -> Value {
    json!({
        "id": event.id,
        "name": event.name,
        "description": event.description,
        "location": event.location,
        "start_time": event.start_time,
        "end_time": event.end_time,
        "status": event.status,
        "quota": event.quota,
        "category": event.category,
    })
}

fn event_view(row: &EventWithOrganizer) -> Value {
    let event = &row.event;
    json!({
        "id": event.id,
        "name": event.name,
        "description": event.description,
        "location": event.location,
        "start_time": event.start_time,
        "end_time": event.end_time,
        "status": event.status,
        "quota": event.quota,
        "category": event.category,
        "organizer": {
            "id": event.organizer_id,
            "username": row.organizer_username,
        },
        "poster": event.poster,
        "created_at": event.created_at,
        "updated_at": event.updated_at,
    })
}

async fn invalidate_event(state: &AppState, id: Uuid) {
    state.cache.delete(&[CacheKey::event(id)]).await;
    state.cache.delete_pattern(CacheKey::EVENTS_PAGES).await;
}

/// A deleted event takes its tickets, registrations and payments with it.
async fn invalidate_dependents(state: &AppState) {
    state
        .cache
        .delete(&[
            CacheKey::TICKETS.to_string(),
            CacheKey::REGISTRATIONS.to_string(),
            CacheKey::PAYMENTS.to_string(),
        ])
        .await;
    for pattern in [
        CacheKey::TICKET_DETAILS,
        CacheKey::REGISTRATION_DETAILS,
        CacheKey::PAYMENT_DETAILS,
    ] {
        state.cache.delete_pattern(pattern).await;
    }
}

async fn find_event(state: &AppState, id: Uuid) -> Result<EventWithOrganizer, AppError> {
    state
        .db
        .get_event(id)
        .await?
        .ok_or_else(|| AppError::not_found(EVENT_NOT_FOUND))
}

pub async fn list_events(
    state: web::Data<AppState>,
    query: web::Query<EventListQuery>,
) -> Result<HttpResponse, AppError> {
    let requested = Pagination::requested_page(query.page.as_deref());

    cached(&state, &CacheKey::events_page(requested), async {
        let total = state.db.count_events().await?;
        let pagination = Pagination::resolve(requested, total, EVENTS_PER_PAGE);
        let events = state.db.list_events(EVENTS_PER_PAGE, pagination.offset()).await?;

        Ok(json!({
            "events": events.iter().map(event_view).collect::<Vec<_>>(),
            "pagination": pagination,
        }))
    })
    .await
}

pub async fn create_event(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    payload: web::Json<EventRequest>,
) -> Result<HttpResponse, AppError> {
    Access::OrganizerAdminOrSuperuser.check(&user)?;

    let fields = validated_fields(&state, payload.into_inner()).await?;
    let event = state.db.create_event(&fields).await?;

    state.cache.delete_pattern(CacheKey::EVENTS_PAGES).await;

    info!("Event {} ({}) created by {}", event.name, event.id, user.username);
    Ok(HttpResponse::Created().json(event_summary(&event)))
}

pub async fn get_event(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();

    cached(&state, &CacheKey::event(id), async {
        let event = find_event(&state, id).await?;
        Ok(event_view(&event))
    })
    .await
}

pub async fn update_event(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
    payload: web::Json<EventRequest>,
) -> Result<HttpResponse, AppError> {
    Access::OrganizerAdminOrSuperuser.check(&user)?;

    let id = path.into_inner();
    let existing = find_event(&state, id).await?;
    if !can_manage_event(&user, existing.event.organizer_id) {
        return Err(AppError::forbidden());
    }

    let fields = validated_fields(&state, payload.into_inner()).await?;
    state.db.update_event(id, &fields).await?;
    invalidate_event(&state, id).await;

    let updated = find_event(&state, id).await?;
    info!("Event {} updated by {}", id, user.username);
    Ok(HttpResponse::Ok().json(event_view(&updated)))
}

pub async fn delete_event(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    Access::OrganizerAdminOrSuperuser.check(&user)?;

    let id = path.into_inner();
    let existing = find_event(&state, id).await?;
    if !can_manage_event(&user, existing.event.organizer_id) {
        return Err(AppError::forbidden());
    }

    state.db.delete_event(id).await?;

    if let Some(poster) = existing.event.poster.as_deref() {
        if let Err(e) = state.storage.delete(&state.config.storage.poster_folder, poster).await {
            warn!("Poster {} of deleted event {} was not removed: {}", poster, id, e);
        }
    }

    invalidate_event(&state, id).await;
    invalidate_dependents(&state).await;

    info!("Event {} deleted by {}", id, user.username);
    Ok(HttpResponse::NoContent().finish())
}

/// A file part read from a multipart body.
#[derive(Debug, Default)]
pub struct UploadedFile {
    pub filename: Option<String>,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub too_large: bool,
}

/// Reads a part into memory, stopping at `limit` bytes but draining the rest.
async fn read_field(field: &mut Field, limit: usize) -> Result<(Vec<u8>, bool), AppError> {
    let mut bytes = Vec::new();
    let mut too_large = false;

    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::non_field(format!("Invalid multipart payload - {}", e)))?;
        if too_large || bytes.len() + chunk.len() > limit {
            too_large = true;
            continue;
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok((bytes, too_large))
}

fn size_label(bytes: usize) -> String {
    let mib = bytes as f64 / (1024.0 * 1024.0);
    if mib.fract() == 0.0 {
        format!("{}MB", mib as u64)
    } else {
        format!("{:.1}MB", mib)
    }
}

/// Checks the uploaded poster against the accepted formats and size limit.
pub fn validate_poster(file: Option<&UploadedFile>, max_bytes: usize, errors: &mut FieldErrors) {
    let Some(file) = file else {
        errors.add("poster", "No file was submitted.");
        return;
    };

    match file.filename.as_deref().filter(|name| !name.trim().is_empty()) {
        None => errors.add("poster", "No file was submitted."),
        Some(name) if !is_allowed_poster(name) => {
            let allowed: Vec<&str> = ALLOWED_POSTER_EXTENSIONS
                .iter()
                .map(|ext| ext.trim_start_matches('.'))
                .collect();
            errors.add(
                "poster",
                format!("Unsupported file extension. Allowed extensions are: {}.", allowed.join(", ")),
            );
        }
        Some(_) => {}
    }

    if file.too_large {
        errors.add("poster", format!("File size cannot exceed {}.", size_label(max_bytes)));
    } else if file.bytes.is_empty() {
        errors.add("poster", "The submitted file is empty.");
    }
}

/// Uploads the new poster, then removes the one it replaces.
pub async fn replace_poster(
    storage: &dyn ObjectStorage,
    folder: &str,
    previous: Option<&str>,
    file: UploadedFile,
) -> Result<String, AppError> {
    let original_name = file.filename.unwrap_or_default();
    let filename = storage
        .upload(folder, &original_name, file.bytes, &file.content_type)
        .await?;

    if let Some(previous) = previous.filter(|previous| *previous != filename) {
        if let Err(e) = storage.delete(folder, previous).await {
            warn!("Old poster {} was not removed: {}", previous, e);
        }
    }

    Ok(filename)
}

pub async fn upload_poster(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    mut payload: Multipart,
) -> Result<HttpResponse, AppError> {
    Access::OrganizerAdminOrSuperuser.check(&user)?;

    let max_bytes = state.config.storage.max_upload_bytes;
    let mut event_id: Option<String> = None;
    let mut poster: Option<UploadedFile> = None;

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| AppError::non_field(format!("Invalid multipart payload - {}", e)))?;
        let name = field.name().to_string();

        match name.as_str() {
            "event_id" => {
                let (bytes, _) = read_field(&mut field, FORM_FIELD_LIMIT).await?;
                event_id = Some(String::from_utf8_lossy(&bytes).trim().to_string());
            }
            "poster" => {
                let filename = field.content_disposition().get_filename().map(str::to_string);
                let content_type = field
                    .content_type()
                    .map(|mime| mime.to_string())
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                let (bytes, too_large) = read_field(&mut field, max_bytes).await?;
                poster = Some(UploadedFile {
                    filename,
                    content_type,
                    bytes,
                    too_large,
                });
            }
            _ => {
                read_field(&mut field, 0).await?;
            }
        }
    }

    let mut errors = FieldErrors::new();
    let event_id = match event_id.as_deref().filter(|raw| !raw.is_empty()) {
        None => {
            errors.add("event_id", "This field is required.");
            None
        }
        Some(raw) => match Uuid::parse_str(raw) {
            Ok(id) => Some(id),
            Err(_) => {
                errors.add("event_id", "Must be a valid UUID.");
                None
            }
        },
    };
    validate_poster(poster.as_ref(), max_bytes, &mut errors);
    errors.into_result()?;

    let event_id = event_id.unwrap_or_default();
    let Some(existing) = state.db.get_event(event_id).await? else {
        return Err(AppError::field("event_id", EVENT_NOT_FOUND));
    };
    if !can_manage_event(&user, existing.event.organizer_id) {
        return Err(AppError::forbidden());
    }

    let folder = &state.config.storage.poster_folder;
    let filename = replace_poster(
        state.storage.as_ref(),
        folder,
        existing.event.poster.as_deref(),
        poster.unwrap_or_default(),
    )
    .await?;
    let event = state.db.set_event_poster(event_id, Some(&filename)).await?;
    invalidate_event(&state, event_id).await;

    let poster_url = state
        .storage
        .presigned_url(folder, &filename, state.config.storage.presign_expiry_seconds)?;

    info!("Poster {} uploaded for event {} by {}", filename, event_id, user.username);
    Ok(HttpResponse::Created().json(json!({
        "id": event.id,
        "name": event.name,
        "poster": filename,
        "poster_url": poster_url,
    })))
}

pub async fn get_poster(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let event = find_event(&state, path.into_inner()).await?.event;
    let filename = event
        .poster
        .ok_or_else(|| AppError::not_found("Event poster not found."))?;

    let poster_url = state.storage.presigned_url(
        &state.config.storage.poster_folder,
        &filename,
        state.config.storage.presign_expiry_seconds,
    )?;

    Ok(HttpResponse::Ok().json(json!({
        "event_id": event.id,
        "poster_url": poster_url,
        "filename": filename,
    })))
}

pub async fn send_reminders(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, AppError> {
    Access::AdminOrSuperuser.check(&user)?;

    let task_id = state.reminders.enqueue(ReminderJob::ScanUpcoming)?;

    info!("Reminder scan {} queued by {}", task_id, user.username);
    Ok(HttpResponse::Ok().json(json!({
        "message": "Event reminder task has been queued successfully",
        "task_id": task_id,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::storage::MockObjectStorage;
    use mockall::predicate::eq;

    fn request() -> EventRequest {
        EventRequest {
            name: Some("RustConf".to_string()),
            description: None,
            location: Some("Jakarta".to_string()),
            start_time: Some("2025-09-01T10:00:00Z".parse().unwrap()),
            end_time: Some("2025-09-01T18:00:00Z".parse().unwrap()),
            status: None,
            quota: Some(100),
            category: Some("Tech".to_string()),
            organizer_id: Some(Uuid::new_v4()),
        }
    }

    fn file(name: &str, size: usize) -> UploadedFile {
        UploadedFile {
            filename: Some(name.to_string()),
            content_type: "image/png".to_string(),
            bytes: vec![1; size],
            too_large: false,
        }
    }

    fn field_errors(err: AppError) -> FieldErrors {
        match err {
            AppError::ValidationError(fields) => fields,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_request_defaults() {
        let fields = request().validate().unwrap();
        assert_eq!(fields.status, EventStatus::Scheduled);
        assert_eq!(fields.description, "");
        assert_eq!(fields.quota, 100);
    }

    #[test]
    fn test_end_before_start_is_rejected() {
        let mut req = request();
        req.end_time = Some("2025-09-01T09:00:00Z".parse().unwrap());
        let errors = field_errors(req.validate().unwrap_err());
        assert_eq!(
            errors.get("end_time"),
            Some(&["End time must be after start time.".to_string()][..])
        );
    }

    #[test]
    fn test_missing_and_invalid_fields_are_named() {
        let mut req = request();
        req.name = Some("  ".to_string());
        req.quota = Some(-1);
        req.status = Some("postponed".to_string());
        req.organizer_id = None;

        let errors = field_errors(req.validate().unwrap_err());
        assert!(errors.get("name").is_some());
        assert!(errors.get("quota").is_some());
        assert!(errors.get("status").is_some());
        assert!(errors.get("organizer_id").is_some());
        assert!(errors.get("location").is_none());
    }

    #[test]
    fn test_poster_validation() {
        let max = 5 * 1024 * 1024;

        let mut errors = FieldErrors::new();
        validate_poster(Some(&file("poster.PNG", 10)), max, &mut errors);
        assert!(errors.is_empty());

        let mut errors = FieldErrors::new();
        validate_poster(Some(&file("poster.pdf", 10)), max, &mut errors);
        assert!(errors.get("poster").unwrap()[0].starts_with("Unsupported file extension."));

        let mut errors = FieldErrors::new();
        let mut big = file("poster.jpg", 1);
        big.too_large = true;
        validate_poster(Some(&big), max, &mut errors);
        assert_eq!(errors.get("poster").unwrap()[0], "File size cannot exceed 5MB.");

        let mut errors = FieldErrors::new();
        validate_poster(None, max, &mut errors);
        assert_eq!(errors.get("poster").unwrap()[0], "No file was submitted.");

        let mut errors = FieldErrors::new();
        validate_poster(Some(&file("poster.gif", 0)), max, &mut errors);
        assert_eq!(errors.get("poster").unwrap()[0], "The submitted file is empty.");
    }

    #[tokio::test]
    async fn test_replace_poster_deletes_previous() {
        let mut storage = MockObjectStorage::new();
        storage
            .expect_upload()
            .withf(|folder, name, bytes, content_type| {
                folder == "event-posters" && name == "new.png" && bytes.len() == 3 && content_type == "image/png"
            })
            .times(1)
            .returning(|_, _, _, _| Ok("stored.png".to_string()));
        storage
            .expect_delete()
            .with(eq("event-posters"), eq("old.png"))
            .times(1)
            .returning(|_, _| Ok(()));

        let stored = replace_poster(&storage, "event-posters", Some("old.png"), file("new.png", 3))
            .await
            .unwrap();
        assert_eq!(stored, "stored.png");
    }

    #[tokio::test]
    async fn test_replace_poster_tolerates_failed_cleanup() {
        let mut storage = MockObjectStorage::new();
        storage
            .expect_upload()
            .returning(|_, _, _, _| Ok("stored.png".to_string()));
        storage
            .expect_delete()
            .returning(|_, _| Err(StorageError::Delete("gone".into()).into()));

        let stored = replace_poster(&storage, "event-posters", Some("old.png"), file("new.png", 3)).await;
        assert_eq!(stored.unwrap(), "stored.png");
    }

    #[tokio::test]
    async fn test_failed_upload_keeps_previous() {
        let mut storage = MockObjectStorage::new();
        storage
            .expect_upload()
            .returning(|_, _, _, _| Err(StorageError::Upload("bucket missing".into()).into()));
        storage.expect_delete().never();

        let result = replace_poster(&storage, "event-posters", Some("old.png"), file("new.png", 3)).await;
        assert!(matches!(result, Err(AppError::StorageError(StorageError::Upload(_)))));
    }

    #[test]
    fn test_size_label() {
        assert_eq!(size_label(5 * 1024 * 1024), "5MB");
        assert_eq!(size_label(1536 * 1024), "1.5MB");
    }
}
