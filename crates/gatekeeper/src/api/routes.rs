//! Control surface handlers
//!
//! Every response is plain text.

use crate::api::ApiState;
use axum::Form;
use axum::extract::rejection::{FormRejection, QueryRejection};
use axum::extract::{Query, State};
use serde::Deserialize;
use std::fmt::Write as _;

/// Parameters of the redemption route
#[derive(Debug, Default, Deserialize)]
pub struct CodeParams {
    #[serde(default)]
    pub code: String,
}

/// Redeem a confirmation code
///
/// The code is read from a form body when one parses, else from the query
/// string, so a POST carrying `?code=` without a body still redeems.
pub async fn authenticate(
    State(state): State<ApiState>,
    query: Result<Query<CodeParams>, QueryRejection>,
    form: Result<Form<CodeParams>, FormRejection>,
) -> String {
    let from_form = form.map(|Form(params)| params.code).unwrap_or_default();
    let code = if from_form.trim().is_empty() {
        query.map(|Query(params)| params.code).unwrap_or_default()
    } else {
        from_form
    };

    state.auth.redeem(code.trim()).await.to_string()
}

/// Full accumulated log
pub async fn view_log(State(state): State<ApiState>) -> String {
    state.log.contents()
}

/// One line per active relay: id, peer, connect time, state
pub async fn list_connections(State(state): State<ApiState>) -> String {
    let mut out = String::new();
    for entry in state.registry.list_all().await {
        let _ = writeln!(
            out,
            "{} {} {} {}",
            entry.id,
            entry.peer_addr,
            entry.connected_at.to_rfc3339(),
            entry.relay.state()
        );
    }
    out
}

pub async fn health() -> &'static str {
    "ok"
}
