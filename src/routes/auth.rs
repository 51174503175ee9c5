use axum::{extract::State, Json};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    memos::{directory, WorkflowError},
    state::AppState,
};

#[derive(Serialize)]
pub struct ProfileResponse {
    pub id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub display_name: String,
    pub title: String,
    pub role: String,
    pub department_id: Option<Uuid>,
    pub department_name: Option<String>,
}

pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<ProfileResponse>> {
    let mut conn = state.db()?;
    let profile = match directory::load_user(&mut conn, user.user_id) {
        Ok(profile) => profile,
        Err(WorkflowError::NotFound(_)) => return Err(AppError::unauthorized()),
        Err(err) => return Err(err.into()),
    };
    let department_name = match profile.department_id {
        Some(id) => directory::load_department(&mut conn, id)?.map(|department| department.name),
        None => None,
    };

    Ok(Json(ProfileResponse {
        id: profile.id,
        display_name: profile.full_name().to_string(),
        username: profile.username,
        email: profile.email,
        title: profile.title,
        role: profile.role,
        department_id: profile.department_id,
        department_name,
    }))
}
