use crate::error::ErrorBody;
use crate::server::{ClearedCache, FindBody, FindOptions};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use plugin::Error;
use std::path::PathBuf;
use tokio::net::UnixStream;

/// An HTTP client for the daemon's UNIX socket. Each request opens a
/// fresh connection; the daemon is local, so connection reuse buys
/// nothing worth the bookkeeping.
pub struct Client {
    socket: PathBuf,
}

impl Client {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    pub async fn list(&self, path: &str) -> Result<Vec<rql::Entry>, Error> {
        self.get_json(&format!("/fs/list?path={}", encode(path))).await
    }

    pub async fn info(&self, path: &str) -> Result<rql::Entry, Error> {
        self.get_json(&format!("/fs/info?path={}", encode(path))).await
    }

    pub async fn metadata(&self, path: &str) -> Result<plugin::JsonObject, Error> {
        self.get_json(&format!("/fs/metadata?path={}", encode(path)))
            .await
    }

    pub async fn schema(&self, path: &str) -> Result<Option<plugin::SchemaGraph>, Error> {
        self.get_json(&format!("/fs/schema?path={}", encode(path))).await
    }

    pub async fn read(&self, path: &str) -> Result<Bytes, Error> {
        let response = self
            .request(
                Method::GET,
                &format!("/fs/read?path={}", encode(path)),
                None,
            )
            .await?;
        Self::collect_ok(response).await
    }

    pub async fn delete(&self, path: &str, recurse: bool) -> Result<(), Error> {
        let uri = format!("/fs/delete?path={}&recurse={recurse}", encode(path));
        let response = self.request(Method::DELETE, &uri, None).await?;
        Self::collect_ok(response).await.map(|_| ())
    }

    pub async fn find(
        &self,
        path: &str,
        options: FindOptions,
        query: serde_json::Value,
    ) -> Result<Vec<rql::Entry>, Error> {
        let body = FindBody {
            path: path.to_string(),
            options,
            query,
        };
        let body = serde_json::to_vec(&body).expect("find bodies serialize infallibly");
        let response = self
            .request(Method::POST, "/find", Some(Bytes::from(body)))
            .await?;
        let raw = Self::collect_ok(response).await?;
        serde_json::from_slice(&raw).map_err(decode_error)
    }

    pub async fn clear_cache(&self, path: &str) -> Result<Vec<String>, Error> {
        let uri = format!("/cache?path={}", encode(path));
        let response = self.request(Method::DELETE, &uri, None).await?;
        let raw = Self::collect_ok(response).await?;
        let cleared: ClearedCache = serde_json::from_slice(&raw).map_err(decode_error)?;
        Ok(cleared.deleted)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, uri: &str) -> Result<T, Error> {
        let response = self.request(Method::GET, uri, None).await?;
        let raw = Self::collect_ok(response).await?;
        serde_json::from_slice(&raw).map_err(decode_error)
    }

    async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Bytes>,
    ) -> Result<Response<Incoming>, Error> {
        let stream = UnixStream::connect(&self.socket).await.map_err(|err| {
            Error::PluginError(format!(
                "could not connect to the daemon at {}: {err}; is `wash server` running?",
                self.socket.display()
            ))
        })?;
        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(transport_error)?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::debug!(error = %err, "connection to the daemon closed");
            }
        });

        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(hyper::header::HOST, "wash")
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .body(Full::new(body.unwrap_or_default()))
            .expect("requests build infallibly");
        sender.send_request(request).await.map_err(transport_error)
    }

    async fn collect_ok(response: Response<Incoming>) -> Result<Bytes, Error> {
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(transport_error)?
            .to_bytes();
        if status == StatusCode::OK {
            return Ok(body);
        }
        match serde_json::from_slice::<ErrorBody>(&body) {
            Ok(error) => Err(error.into_error()),
            Err(_) => Err(Error::PluginError(format!(
                "the daemon returned {status}: {}",
                String::from_utf8_lossy(&body)
            ))),
        }
    }
}

fn encode(path: &str) -> String {
    utf8_percent_encode(path, NON_ALPHANUMERIC).to_string()
}

fn transport_error(err: hyper::Error) -> Error {
    Error::PluginError(format!("error talking to the daemon: {err}"))
}

fn decode_error(err: serde_json::Error) -> Error {
    Error::PluginError(format!("could not decode the daemon's response: {err}"))
}
