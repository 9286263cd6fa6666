//! Read-only web surface for the synced catalog
//!
//! Serves canonical sets and symbols plus the per-source sync state. Handlers
//! only read; nothing here triggers a sync.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use mtg_common::{CanonicalEntity, EntityKind, Set, SymbolSet, SymbolWatermark};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::ledger::{SourceVersionRecord, VersionLedger};
use crate::store::EntityStore;

/// Symbol used for sets without a matching set symbol
pub const DEFAULT_SYMBOL: &str = "DEFAULT";

const SCRYFALL_API: &str = "https://api.scryfall.com";
const SCRYFALL_ROOT: &str = "https://scryfall.com";

/// Shared application state
#[derive(Clone)]
struct AppState {
    store: Arc<dyn EntityStore>,
    ledger: VersionLedger,
}

/// API response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

/// Error response: status plus an envelope carrying the message
type ApiError = (StatusCode, Json<ApiResponse<()>>);

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ApiResponse {
            success: false,
            data: None,
            error: Some(message.into()),
        }),
    )
}

/// Scryfall links for a set
#[derive(Debug, Serialize, PartialEq)]
pub struct ScryfallUris {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    pub page: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub search: String,
}

/// A set as served, with its resolved symbol
#[derive(Debug, Serialize)]
pub struct SetView {
    #[serde(flatten)]
    pub set: Set,
    /// Lowercase code of the set symbol to draw for this set
    pub code_symbol: String,
    pub uris_scryfall: ScryfallUris,
}

#[derive(Serialize)]
struct WatermarkView {
    watermarks: Vec<SymbolWatermark>,
    watermarks_set: Vec<SymbolWatermark>,
}

#[derive(Serialize)]
struct MetaView {
    sources: Vec<SourceVersionRecord>,
    counts: BTreeMap<EntityKind, usize>,
}

/// Build Scryfall links for a set
pub fn scryfall_uris(set: &Set) -> ScryfallUris {
    let query = format!("e:{}", set.code);
    ScryfallUris {
        icon: set.icon_svg_uri.clone(),
        object: set.id.as_ref().map(|id| format!("{}/sets/{}", SCRYFALL_API, id)),
        page: format!("{}/sets/{}", SCRYFALL_ROOT, set.code),
        parent: set
            .code_parent
            .as_ref()
            .map(|parent| format!("{}/sets/{}", SCRYFALL_API, parent)),
        search: format!(
            "{}/cards/search?q={}&include_extras=true&include_variations=true&unique=prints&order=set",
            SCRYFALL_API,
            urlencoding::encode(&query)
        ),
    }
}

/// File stem of a Scryfall icon URI: `.../sets/mh2.svg?123` gives `mh2`
fn icon_stem(uri: &str) -> Option<&str> {
    let path = uri.split('?').next()?;
    let file = path.rsplit('/').next()?;
    let stem = file.split('.').next()?;
    (!stem.is_empty()).then_some(stem)
}

/// Pick the set symbol for a set.
///
/// Tries the set code, then the name of its Scryfall icon, then falls back
/// to [`DEFAULT_SYMBOL`]. An alias symbol resolves to its parent.
pub fn resolve_symbol(set: &Set, symbols: &HashMap<String, SymbolSet>) -> String {
    let lookup = |code: &str| {
        symbols
            .get(&code.to_uppercase())
            .map(|symbol| symbol.alias().to_lowercase())
    };

    lookup(&set.code)
        .or_else(|| set.icon_svg_uri.as_deref().and_then(icon_stem).and_then(lookup))
        .unwrap_or_else(|| {
            log::debug!("No symbol for set {}, using default", set.code);
            DEFAULT_SYMBOL.to_lowercase()
        })
}

fn internal_error(context: &str, e: impl std::fmt::Display) -> ApiError {
    log::error!("{}: {}", context, e);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, context)
}

fn symbol_index(store: &dyn EntityStore) -> Result<HashMap<String, SymbolSet>, ApiError> {
    let symbols = store
        .list_all(EntityKind::SymbolSet)
        .map_err(|e| internal_error("Failed to list symbols", e))?;
    Ok(symbols
        .into_iter()
        .filter_map(|stored| match stored.entity {
            CanonicalEntity::SymbolSet(symbol) => Some((symbol.code.clone(), symbol)),
            _ => None,
        })
        .collect())
}

fn set_view(set: Set, symbols: &HashMap<String, SymbolSet>) -> SetView {
    SetView {
        code_symbol: resolve_symbol(&set, symbols),
        uris_scryfall: scryfall_uris(&set),
        set,
    }
}

/// GET /api/sets
async fn sets_handler(State(state): State<AppState>) -> ApiResult<Vec<SetView>> {
    let symbols = symbol_index(state.store.as_ref())?;
    let sets = state
        .store
        .list_all(EntityKind::Set)
        .map_err(|e| internal_error("Failed to list sets", e))?;

    let views = sets
        .into_iter()
        .filter_map(|stored| match stored.entity {
            CanonicalEntity::Set(set) => Some(set_view(set, &symbols)),
            _ => None,
        })
        .collect();
    Ok(ApiResponse::ok(views))
}

/// GET /api/sets/{code}
async fn set_handler(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<SetView> {
    let stored = state
        .store
        .get(EntityKind::Set, &code.to_lowercase())
        .map_err(|e| internal_error("Failed to load set", e))?;
    let Some(CanonicalEntity::Set(set)) = stored.map(|s| s.entity) else {
        return Err(api_error(StatusCode::NOT_FOUND, format!("set '{}' not found", code)));
    };
    let symbols = symbol_index(state.store.as_ref())?;
    Ok(ApiResponse::ok(set_view(set, &symbols)))
}

/// GET /api/symbols/set/{code}
async fn symbol_set_handler(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<SymbolSet> {
    let stored = state
        .store
        .get(EntityKind::SymbolSet, &code.to_uppercase())
        .map_err(|e| internal_error("Failed to load symbol", e))?;
    match stored.map(|s| s.entity) {
        Some(CanonicalEntity::SymbolSet(symbol)) => Ok(ApiResponse::ok(symbol)),
        _ => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("set symbol '{}' not found", code),
        )),
    }
}

/// GET /api/symbols/watermark
async fn watermarks_handler(State(state): State<AppState>) -> ApiResult<WatermarkView> {
    let stored = state
        .store
        .list_all(EntityKind::SymbolWatermark)
        .map_err(|e| internal_error("Failed to list watermarks", e))?;

    let (watermarks_set, watermarks): (Vec<_>, Vec<_>) = stored
        .into_iter()
        .filter_map(|s| match s.entity {
            CanonicalEntity::SymbolWatermark(wm) => Some(wm),
            _ => None,
        })
        .partition(|wm| wm.parent.is_some());

    Ok(ApiResponse::ok(WatermarkView {
        watermarks,
        watermarks_set,
    }))
}

/// GET /api/meta - per-source sync state and entity counts
async fn meta_handler(State(state): State<AppState>) -> ApiResult<MetaView> {
    let sources = state
        .ledger
        .list()
        .map_err(|e| internal_error("Failed to read version ledger", e))?;
    let mut counts = BTreeMap::new();
    for kind in EntityKind::ALL {
        let count = state
            .store
            .count(kind)
            .map_err(|e| internal_error("Failed to count entities", e))?;
        counts.insert(kind, count);
    }
    Ok(ApiResponse::ok(MetaView { sources, counts }))
}

/// Build the web server router
pub fn create_router(store: Arc<dyn EntityStore>, ledger: VersionLedger) -> Router {
    let state = AppState { store, ledger };

    Router::new()
        .route("/api/sets", get(sets_handler))
        .route("/api/sets/{code}", get(set_handler))
        .route("/api/symbols/set/{code}", get(symbol_set_handler))
        .route("/api/symbols/watermark", get(watermarks_handler))
        .route("/api/meta", get(meta_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the web server
///
/// Binds to 0.0.0.0 (all interfaces) to work with Docker port mapping.
pub async fn serve(
    store: Arc<dyn EntityStore>,
    ledger: VersionLedger,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_router(store, ledger);
    let addr = format!("0.0.0.0:{}", port);

    log::info!("Catalog API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
