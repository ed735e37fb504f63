//! Profile and organization forms.
//!
//! `/dashboard/settings` doubles as the onboarding page: a signed-in user
//! without an organization is sent here until they create one.

use crate::models::{
    AuthUser, Organization, OrganizationChanges, SignedInUser, UserRecord, UserUpdate,
};
use crate::services::storage_client::asset_key;
use crate::AppState;
use askama::Template;
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use service_core::error::AppError;
use std::collections::HashMap;
use validator::{Validate, ValidationErrors};

const AVATAR_FOLDER: &str = "avatars";
const ORG_LOGO_FOLDER: &str = "org_logos";

#[derive(Debug, Clone, Default, Validate)]
pub struct UserProfileForm {
    #[validate(length(max = 100, message = "Name must be at most 100 characters"))]
    pub name: String,
    #[validate(length(max = 50, message = "Username must be at most 50 characters"))]
    pub username: String,
    #[validate(length(max = 250, message = "Bio must be at most 250 characters"))]
    pub bio: String,
}

#[derive(Debug, Clone, Default, Validate)]
pub struct OrganizationForm {
    #[validate(length(min = 1, max = 100, message = "Organization name is required"))]
    pub org_name: String,
    #[validate(length(max = 250, message = "Description must be at most 250 characters"))]
    pub org_description: String,
    #[validate(length(max = 50, message = "Handle must be at most 50 characters"))]
    pub org_handle: String,
    #[validate(length(max = 250, message = "Meta data must be at most 250 characters"))]
    pub org_meta: String,
}

#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Template)]
#[template(path = "settings.html")]
pub struct SettingsTemplate {
    pub user: Option<AuthUser>,
    pub current_page: &'static str,
    pub profile: UserProfileForm,
    pub org: OrganizationForm,
    pub has_org: bool,
    pub avatar_src: Option<String>,
    pub logo_src: Option<String>,
    pub errors: Vec<String>,
}

#[derive(Template)]
#[template(path = "user_profile.html")]
pub struct UserProfileTemplate {
    pub user: Option<AuthUser>,
    pub current_page: &'static str,
    pub profile: UserProfileForm,
    pub avatar_src: Option<String>,
    pub errors: Vec<String>,
}

/// Text fields and image parts of a submitted multipart form.
#[derive(Debug, Default)]
pub struct Submission {
    fields: HashMap<String, String>,
    images: HashMap<String, ImageUpload>,
}

impl Submission {
    pub async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut submission = Submission::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Malformed form data: {}", e)))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let content_type = field
                        .content_type()
                        .unwrap_or("application/octet-stream")
                        .to_string();
                    let bytes = field.bytes().await.map_err(|e| {
                        tracing::error!("Failed to read upload {}: {}", file_name, e);
                        AppError::BadRequest(anyhow::anyhow!("Failed to read uploaded file"))
                    })?;
                    // Browsers send an empty part when no file was picked
                    if file_name.is_empty() || bytes.is_empty() {
                        continue;
                    }
                    submission.images.insert(
                        name,
                        ImageUpload {
                            file_name,
                            content_type,
                            bytes: bytes.to_vec(),
                        },
                    );
                }
                None => {
                    let value = field.text().await.map_err(|e| {
                        AppError::BadRequest(anyhow::anyhow!("Malformed form field: {}", e))
                    })?;
                    submission.fields.insert(name, value);
                }
            }
        }

        Ok(submission)
    }

    fn text(&self, name: &str) -> String {
        self.fields
            .get(name)
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    }

    pub fn profile(&self) -> UserProfileForm {
        UserProfileForm {
            name: self.text("name"),
            username: self.text("username"),
            bio: self.text("bio"),
        }
    }

    pub fn organization(&self) -> OrganizationForm {
        OrganizationForm {
            org_name: self.text("org_name"),
            org_description: self.text("org_description"),
            org_handle: self.text("org_handle"),
            org_meta: self.text("org_meta"),
        }
    }

    pub fn take_image(&mut self, name: &str) -> Option<ImageUpload> {
        self.images.remove(name)
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

impl From<&UserRecord> for UserProfileForm {
    fn from(record: &UserRecord) -> Self {
        Self {
            name: record.name.clone().unwrap_or_default(),
            username: record.username.clone().unwrap_or_default(),
            bio: record.bio.clone().unwrap_or_default(),
        }
    }
}

impl From<&Organization> for OrganizationForm {
    fn from(org: &Organization) -> Self {
        Self {
            org_name: org.name.clone(),
            org_description: org.description.clone().unwrap_or_default(),
            org_handle: org.handle.clone().unwrap_or_default(),
            org_meta: org.meta.clone().unwrap_or_default(),
        }
    }
}

/// Flatten validation errors into display messages, sorted for stable output.
fn error_messages(errors: &ValidationErrors) -> Vec<String> {
    let mut messages: Vec<String> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| {
                e.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("{} is invalid", field))
            })
        })
        .collect();
    messages.sort();
    messages
}

fn check_image(image: &Option<ImageUpload>, label: &str, errors: &mut Vec<String>) {
    if let Some(image) = image {
        if !image.content_type.starts_with("image/") {
            errors.push(format!("{} must be an image", label));
        }
    }
}

/// Stored keys are relative to the bucket; OAuth avatars are already absolute.
fn asset_src(state: &AppState, key: Option<&str>) -> Option<String> {
    let key = key.filter(|k| !k.is_empty())?;
    if key.starts_with("http://") || key.starts_with("https://") {
        return Some(key.to_string());
    }
    state.assets.as_ref().map(|assets| assets.public_url(key))
}

fn upstream(what: &'static str) -> impl Fn(anyhow::Error) -> AppError {
    move |e| {
        tracing::error!("{} failed: {}", what, e);
        AppError::BadGateway(format!("{} failed", what))
    }
}

async fn upload_image(
    state: &AppState,
    signed_in: &SignedInUser,
    folder: &str,
    image: ImageUpload,
) -> Result<String, AppError> {
    let assets = state.assets.as_ref().ok_or(AppError::ServiceUnavailable)?;
    let key = asset_key(folder, &signed_in.user.id, &image.file_name);
    assets
        .upload(&key, &image.content_type, image.bytes, &signed_in.access_token)
        .await
        .map_err(upstream("Image upload"))?;
    Ok(key)
}

async fn load_records(
    state: &AppState,
    signed_in: &SignedInUser,
) -> Result<(Option<UserRecord>, Option<Organization>), AppError> {
    let profiles = state.profiles.as_ref().ok_or(AppError::ServiceUnavailable)?;
    let user_id = signed_in.user.id.as_str();
    let token = signed_in.access_token.as_str();

    let (record, org) = tokio::try_join!(
        profiles.get_user(user_id, token),
        profiles.organization_for_creator(user_id, token),
    )
    .map_err(upstream("Profile lookup"))?;
    Ok((record, org))
}

pub async fn settings_page(
    State(state): State<AppState>,
    signed_in: SignedInUser,
) -> Result<impl IntoResponse, AppError> {
    let (record, org) = load_records(&state, &signed_in).await?;

    Ok(SettingsTemplate {
        profile: record.as_ref().map(UserProfileForm::from).unwrap_or_default(),
        org: org.as_ref().map(OrganizationForm::from).unwrap_or_default(),
        has_org: org.is_some(),
        avatar_src: asset_src(&state, record.as_ref().and_then(|r| r.avatar_url.as_deref())),
        logo_src: asset_src(&state, org.as_ref().and_then(|o| o.logo_url.as_deref())),
        errors: Vec::new(),
        user: Some(signed_in.user),
        current_page: "settings",
    })
}

pub async fn settings_handler(
    State(state): State<AppState>,
    signed_in: SignedInUser,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let profiles = state
        .profiles
        .clone()
        .ok_or(AppError::ServiceUnavailable)?;
    let mut submission = Submission::read(multipart).await?;
    let profile = submission.profile();
    let org_form = submission.organization();
    let avatar = submission.take_image("avatar");
    let logo = submission.take_image("org_logo");

    let mut errors = Vec::new();
    if let Err(e) = profile.validate() {
        errors.extend(error_messages(&e));
    }
    if let Err(e) = org_form.validate() {
        errors.extend(error_messages(&e));
    }
    check_image(&avatar, "Profile image", &mut errors);
    check_image(&logo, "Organization image", &mut errors);

    let existing_org = profiles
        .organization_for_creator(&signed_in.user.id, &signed_in.access_token)
        .await
        .map_err(upstream("Organization lookup"))?;

    if !errors.is_empty() {
        let record = profiles
            .get_user(&signed_in.user.id, &signed_in.access_token)
            .await
            .map_err(upstream("User lookup"))?;
        let template = SettingsTemplate {
            avatar_src: asset_src(&state, record.as_ref().and_then(|r| r.avatar_url.as_deref())),
            logo_src: asset_src(
                &state,
                existing_org.as_ref().and_then(|o| o.logo_url.as_deref()),
            ),
            has_org: existing_org.is_some(),
            profile,
            org: org_form,
            errors,
            user: Some(signed_in.user),
            current_page: "settings",
        };
        return Ok((StatusCode::UNPROCESSABLE_ENTITY, template).into_response());
    }

    let avatar_url = match avatar {
        Some(image) => Some(upload_image(&state, &signed_in, AVATAR_FOLDER, image).await?),
        None => None,
    };
    let logo_url = match logo {
        Some(image) => Some(upload_image(&state, &signed_in, ORG_LOGO_FOLDER, image).await?),
        None => None,
    };

    let update = UserUpdate {
        id: signed_in.user.id.clone(),
        name: non_empty(&profile.name),
        username: non_empty(&profile.username),
        bio: non_empty(&profile.bio),
        avatar_url,
    };
    profiles
        .upsert_user(&update, &signed_in.access_token)
        .await
        .map_err(upstream("User update"))?;

    let mut changes = OrganizationChanges {
        name: org_form.org_name.clone(),
        description: non_empty(&org_form.org_description),
        handle: non_empty(&org_form.org_handle),
        meta: non_empty(&org_form.org_meta),
        logo_url,
        creator: None,
    };
    match existing_org {
        Some(org) => {
            profiles
                .update_organization(&org.id, &changes, &signed_in.access_token)
                .await
                .map_err(upstream("Organization update"))?;
            tracing::info!(user_id = %signed_in.user.id, org_id = %org.id, "Organization updated");
        }
        None => {
            changes.creator = Some(signed_in.user.id.clone());
            profiles
                .insert_organization(&changes, &signed_in.access_token)
                .await
                .map_err(upstream("Organization insert"))?;
            tracing::info!(user_id = %signed_in.user.id, "Organization created");
        }
    }

    Ok(Redirect::to("/dashboard").into_response())
}

pub async fn user_profile_page(
    State(state): State<AppState>,
    signed_in: SignedInUser,
) -> Result<impl IntoResponse, AppError> {
    let profiles = state.profiles.as_ref().ok_or(AppError::ServiceUnavailable)?;
    let record = profiles
        .get_user(&signed_in.user.id, &signed_in.access_token)
        .await
        .map_err(upstream("User lookup"))?;

    Ok(UserProfileTemplate {
        profile: record.as_ref().map(UserProfileForm::from).unwrap_or_default(),
        avatar_src: asset_src(&state, record.as_ref().and_then(|r| r.avatar_url.as_deref())),
        errors: Vec::new(),
        user: Some(signed_in.user),
        current_page: "user-profile",
    })
}

pub async fn user_profile_handler(
    State(state): State<AppState>,
    signed_in: SignedInUser,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let profiles = state
        .profiles
        .clone()
        .ok_or(AppError::ServiceUnavailable)?;
    let mut submission = Submission::read(multipart).await?;
    let profile = submission.profile();
    let avatar = submission.take_image("avatar");

    let mut errors = Vec::new();
    if let Err(e) = profile.validate() {
        errors.extend(error_messages(&e));
    }
    check_image(&avatar, "Profile image", &mut errors);

    if !errors.is_empty() {
        let record = profiles
            .get_user(&signed_in.user.id, &signed_in.access_token)
            .await
            .map_err(upstream("User lookup"))?;
        let template = UserProfileTemplate {
            avatar_src: asset_src(&state, record.as_ref().and_then(|r| r.avatar_url.as_deref())),
            profile,
            errors,
            user: Some(signed_in.user),
            current_page: "user-profile",
        };
        return Ok((StatusCode::UNPROCESSABLE_ENTITY, template).into_response());
    }

    let avatar_url = match avatar {
        Some(image) => Some(upload_image(&state, &signed_in, AVATAR_FOLDER, image).await?),
        None => None,
    };

    let update = UserUpdate {
        id: signed_in.user.id.clone(),
        name: non_empty(&profile.name),
        username: non_empty(&profile.username),
        bio: non_empty(&profile.bio),
        avatar_url,
    };
    profiles
        .upsert_user(&update, &signed_in.access_token)
        .await
        .map_err(upstream("User update"))?;
    tracing::info!(user_id = %signed_in.user.id, "User profile updated");

    Ok(Redirect::to("/dashboard/user-profile").into_response())
}

/// Older onboarding URLs answer with a permanent redirect to the canonical one.
pub async fn legacy_onboarding_redirect(State(state): State<AppState>) -> Redirect {
    Redirect::permanent(state.gate.onboarding_path())
}
