//! Request handling: route, act on the store, build the response.

use std::sync::Arc;

use http::StatusCode;
use tracing::{debug, warn};

use crate::chirp::{ChirpDraft, ChirpId, Feed};
use crate::error::{ApiError, CHIRP_NOT_FOUND, ROUTE_NOT_FOUND};
use crate::federation::{Federation, VIA_HEADER};
use crate::http::{Request, Response};
use crate::router::Route;
use crate::static_files::StaticFiles;
use crate::store::ChirpStore;

/// Everything a connection task needs to answer requests. Shared by all
/// connections of a server.
pub struct App {
    store: Arc<ChirpStore>,
    federation: Federation,
    files: StaticFiles,
}

impl App {
    pub fn new(store: Arc<ChirpStore>, federation: Federation, files: StaticFiles) -> Self {
        Self {
            store,
            federation,
            files,
        }
    }

    pub fn store(&self) -> &Arc<ChirpStore> {
        &self.store
    }

    /// Produces the response for one request. Client mistakes become 4xx
    /// responses; nothing here fails the connection.
    pub async fn handle(&self, request: &Request) -> Response {
        let result = match Route::resolve(&request.method, &request.path) {
            Route::ListChirps => Ok(self.list_chirps(request).await),
            Route::CreateChirp => self.create_chirp(&request.body),
            Route::UpdateChirp(id) => self.update_chirp(id, &request.body),
            Route::DeleteChirp(id) => self.delete_chirp(id),
            Route::StaticFile(path) => self.files.serve(&path).await,
            Route::NotFound => Err(ApiError::NotFound(ROUTE_NOT_FOUND)),
        };
        result.unwrap_or_else(ApiError::into_response)
    }

    async fn list_chirps(&self, request: &Request) -> Response {
        let local = self.store.list_all();

        // A query that already carries `Via` came from a peer; answer it from
        // the local store so fan-out stops after one hop.
        let chirps = match request.header(VIA_HEADER) {
            Some(via) => {
                if via_names(via, self.federation.identity()) {
                    warn!(via, "federated query names this node; check peer lists");
                } else {
                    debug!(via, "answering federated query locally");
                }
                local
            }
            None => self.federation.aggregate(local).await,
        };

        Response::json(StatusCode::OK, &Feed::new(chirps))
    }

    fn create_chirp(&self, body: &[u8]) -> Result<Response, ApiError> {
        let draft = ChirpDraft::from_body(body)?;
        let chirp = self.store.add(draft);
        debug!(id = chirp.id, username = %chirp.username, "chirp created");
        Ok(Response::json(StatusCode::CREATED, &chirp))
    }

    /// Answers 201 on success, matching create.
    fn update_chirp(&self, id: Option<ChirpId>, body: &[u8]) -> Result<Response, ApiError> {
        let draft = ChirpDraft::from_body(body)?;
        let id = id.ok_or(ApiError::NotFound(CHIRP_NOT_FOUND))?;
        let chirp = self
            .store
            .update(id, draft)
            .ok_or(ApiError::NotFound(CHIRP_NOT_FOUND))?;
        debug!(id, "chirp updated");
        Ok(Response::json(StatusCode::CREATED, &chirp))
    }

    fn delete_chirp(&self, id: Option<ChirpId>) -> Result<Response, ApiError> {
        let id = id.ok_or(ApiError::NotFound(CHIRP_NOT_FOUND))?;
        if !self.store.delete(id) {
            return Err(ApiError::NotFound(CHIRP_NOT_FOUND));
        }
        debug!(id, "chirp deleted");
        Ok(Response::text(StatusCode::OK, "Chirp deleted successfully"))
    }
}

/// `Via` may list several comma-separated hops.
fn via_names(via: &str, identity: &str) -> bool {
    via.split(',').any(|hop| hop.trim() == identity)
}
