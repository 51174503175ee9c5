use axum::{
    extract::{Path, State},
    Json,
};

use crate::{
    error::AppResult,
    memos::workflow::{self, SealVerification},
    state::AppState,
};

/// Public lookup printed on the signed copy; no token required.
pub async fn verify_seal(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> AppResult<Json<SealVerification>> {
    let mut conn = state.db()?;
    let verification = workflow::verify_seal(&mut conn, code.trim())?;
    Ok(Json(verification))
}
