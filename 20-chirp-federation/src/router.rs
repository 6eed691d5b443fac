use http::Method;

use crate::chirp::ChirpId;

pub const CHIRPS_PATH: &str = "/chirps";

const CHIRP_PREFIX: &str = "/chirps/";

/// Where a request goes, decided from its method and path alone.
///
/// `None` in the identifier-carrying variants is the invalid-identifier
/// sentinel: the path matched `/chirps/...` but the segment was missing,
/// nested, or not an integer. Handlers answer it with 404.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    ListChirps,
    CreateChirp,
    UpdateChirp(Option<ChirpId>),
    DeleteChirp(Option<ChirpId>),
    StaticFile(String),
    NotFound,
}

impl Route {
    pub fn resolve(method: &Method, path: &str) -> Self {
        match method.as_str() {
            "GET" if path == CHIRPS_PATH => Route::ListChirps,
            "GET" => Route::StaticFile(path.to_string()),
            "POST" if path == CHIRPS_PATH => Route::CreateChirp,
            "PUT" => match_chirp_id(path).map_or(Route::NotFound, Route::UpdateChirp),
            "DELETE" => match_chirp_id(path).map_or(Route::NotFound, Route::DeleteChirp),
            _ => Route::NotFound,
        }
    }
}

/// `Some(id)` when `path` has the `/chirps/{id}` shape; the inner option is
/// `None` when the segment does not name a valid identifier.
fn match_chirp_id(path: &str) -> Option<Option<ChirpId>> {
    let segment = path.strip_prefix(CHIRP_PREFIX)?;
    if segment.is_empty() || segment.contains('/') {
        return Some(None);
    }
    Some(segment.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_table() {
        let cases = [
            (Method::GET, "/chirps", Route::ListChirps),
            (Method::GET, "/", Route::StaticFile("/".into())),
            (Method::GET, "/chirps/1", Route::StaticFile("/chirps/1".into())),
            (Method::POST, "/chirps", Route::CreateChirp),
            (Method::POST, "/chirps/1", Route::NotFound),
            (Method::POST, "/elsewhere", Route::NotFound),
            (Method::PUT, "/chirps/12", Route::UpdateChirp(Some(12))),
            (Method::DELETE, "/chirps/3", Route::DeleteChirp(Some(3))),
            (Method::PUT, "/chirps", Route::NotFound),
            (Method::DELETE, "/posts/3", Route::NotFound),
            (Method::PATCH, "/chirps/3", Route::NotFound),
            (Method::HEAD, "/chirps", Route::NotFound),
        ];

        for (method, path, expected) in cases {
            assert_eq!(Route::resolve(&method, path), expected, "{method} {path}");
        }
    }

    #[test]
    fn invalid_identifiers_become_the_sentinel() {
        for path in ["/chirps/", "/chirps/abc", "/chirps/1/2", "/chirps/1.5", "/chirps/99999999999999999999"] {
            assert_eq!(Route::resolve(&Method::DELETE, path), Route::DeleteChirp(None), "{path}");
            assert_eq!(Route::resolve(&Method::PUT, path), Route::UpdateChirp(None), "{path}");
        }
    }

    #[test]
    fn extension_methods_are_not_found() {
        let method = Method::from_bytes(b"BREW").unwrap();
        assert_eq!(Route::resolve(&method, "/chirps"), Route::NotFound);
    }
}
