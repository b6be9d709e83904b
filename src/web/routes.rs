use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use crate::core::error::Error;
use crate::core::note::Note;
use crate::search::engine::KnowledgeBase;
use crate::search::graph::{GraphOptions, NoteGraph};

#[derive(Debug)]
pub struct HttpError(pub Error);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            Error::KeyNotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidKey(_) => StatusCode::BAD_REQUEST,
            Error::GraphCancelled { .. } | Error::ModelUnavailable(_) => {
                tracing::warn!("{}", self.0);
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => {
                tracing::error!("{:?}", self.0);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct GraphQuery {
    pub neighbors: Option<usize>,
}

/// Run a store operation off the async runtime.
async fn blocking<T, F>(state: Arc<AppState>, f: F) -> Result<T, HttpError>
where
    T: Send + 'static,
    F: FnOnce(&KnowledgeBase) -> Result<T, Error> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let kb = KnowledgeBase::open(&state.paths, state.settings.clone(), state.encoder.clone())?;
        f(&kb)
    })
    .await
    .map_err(|e| HttpError(Error::Io(std::io::Error::other(e))))?
    .map_err(HttpError)
}

pub async fn graph(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GraphQuery>,
) -> Result<Json<NoteGraph>, HttpError> {
    let settings = &state.settings.graph;
    let options = GraphOptions::new(settings.clamp_neighbors(query.neighbors))
        .with_timeout(settings.timeout());

    let graph = blocking(state.clone(), move |kb| kb.get_graph(&options)).await?;
    Ok(Json(graph))
}

pub async fn note(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<Note>, HttpError> {
    let note = blocking(state, move |kb| kb.get_note(&key)).await?;
    Ok(Json(note))
}
