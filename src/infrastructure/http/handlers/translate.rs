//! Translation Handlers

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::application::{
    CancelTranslationCommand, GetTranslationStatus, ListActiveTranslations,
    SubmitTranslationAsyncCommand, SubmitTranslationCommand,
};
use crate::infrastructure::http::dto::{
    ActiveTranslationsDto, ApiResponse, CancelTranslationResponseDto, RequestIdRequest,
    SubmitTranslationResponseDto, TranslateRequest, TranslateResponseDto, TranslationStatusDto,
};
use crate::infrastructure::http::error::ApiError;
use crate::infrastructure::http::state::AppState;

fn target_language(state: &AppState, requested: Option<String>) -> String {
    requested
        .filter(|lang| !lang.trim().is_empty())
        .unwrap_or_else(|| state.defaults.target_language.clone())
}

// ============================================================================
// Translate (sync)
// ============================================================================

pub async fn translate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TranslateRequest>,
) -> Result<Json<ApiResponse<TranslateResponseDto>>, ApiError> {
    let cmd = SubmitTranslationCommand {
        target_language: target_language(&state, req.target_language),
        options: req.options.merge_into(&state.defaults.options),
        source_text: req.source_text,
    };

    let result = state.submit_translation_handler.handle(cmd).await?;

    Ok(Json(ApiResponse::success(TranslateResponseDto {
        cached: result.cached,
        translation: result.translation,
    })))
}

// ============================================================================
// Submit (async)
// ============================================================================

pub async fn submit_translation(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TranslateRequest>,
) -> Result<Json<ApiResponse<SubmitTranslationResponseDto>>, ApiError> {
    let cmd = SubmitTranslationAsyncCommand {
        target_language: target_language(&state, req.target_language),
        options: req.options.merge_into(&state.defaults.options),
        source_text: req.source_text,
    };

    let result = state.submit_translation_async_handler.handle(cmd).await?;

    Ok(Json(ApiResponse::success(SubmitTranslationResponseDto {
        request_id: result.request_id.to_string(),
        cached: result.cached,
    })))
}

// ============================================================================
// Status / Cancel
// ============================================================================

pub async fn translation_status(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RequestIdRequest>,
) -> Result<Json<ApiResponse<TranslationStatusDto>>, ApiError> {
    let status = state
        .get_translation_status_handler
        .handle(GetTranslationStatus {
            request_id: req.request_id,
        })?;

    Ok(Json(ApiResponse::success(TranslationStatusDto::from(status))))
}

pub async fn cancel_translation(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RequestIdRequest>,
) -> Result<Json<ApiResponse<CancelTranslationResponseDto>>, ApiError> {
    let result = state
        .cancel_translation_handler
        .handle(CancelTranslationCommand {
            request_id: req.request_id,
        })?;

    Ok(Json(ApiResponse::success(CancelTranslationResponseDto {
        request_id: result.request_id.to_string(),
        was_running: result.was_running,
    })))
}

pub async fn list_active_translations(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<ActiveTranslationsDto>> {
    let active = state
        .list_active_translations_handler
        .handle(ListActiveTranslations);

    Json(ApiResponse::success(ActiveTranslationsDto {
        translations: active.into_iter().map(TranslationStatusDto::from).collect(),
    }))
}
