// 对象存储客户端实现
//
// 所有请求：
// - 连接超时、读写超时均来自配置（默认 20 秒）
// - 禁用连接复用（Connection: close，且不保留空闲连接）
// - 平台接口携带 accessKey 请求头，临时地址 PUT 不携带

use crate::config::ObjectConfig;
use crate::error::UploadError;
use crate::storage::{
    ApiEnvelope, CompletionRequest, InitData, ObjectStoreApi, PartData, PartUpload,
};
use crate::uploader::PartResult;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{multipart, Client, RequestBuilder, StatusCode};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

/// 访问密钥请求头
const ACCESS_KEY_HEADER: &str = "accessKey";

/// 初始化/完成接口的 Content-Type
const JSON_CONTENT_TYPE: &str = "application/json;charset=UTF-8";

/// 对象存储客户端
#[derive(Debug, Clone)]
pub struct ObjectClient {
    /// 平台接口使用的 HTTP 客户端（带总超时）
    client: Client,
    /// 临时地址相关请求使用的 HTTP 客户端（只限制连接超时）
    transfer_client: Client,
    /// 对象存储配置
    config: Arc<ObjectConfig>,
}

impl ObjectClient {
    /// 创建客户端
    pub fn new(config: Arc<ObjectConfig>) -> Result<Self> {
        let client = build_http_client(config.connect_timeout(), Some(config.read_timeout()), false)
            .context("创建 HTTP 客户端失败")?;

        // 临时地址相关请求按配置跳过证书校验；大文件直传耗时不可预估，不设置总超时
        let transfer_client =
            build_http_client(config.connect_timeout(), None, config.accept_invalid_certs)
                .context("创建直传 HTTP 客户端失败")?;

        info!(
            "初始化对象存储客户端: interface={:?}, res_id={}, timeout={}s/{}s",
            config.interface_type,
            config.res_id,
            config.connect_timeout_secs,
            config.read_timeout_secs
        );

        Ok(Self {
            client,
            transfer_client,
            config,
        })
    }

    /// 拼接接口地址: `<endpoint>/<res_id>/<file_key>`
    fn endpoint(&self, base: &str, file_key: &str) -> String {
        let encoded_key = file_key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "{}/{}/{}",
            base.trim_end_matches('/'),
            self.config.res_id,
            encoded_key
        )
    }

    /// 附加 accessKey
    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header(ACCESS_KEY_HEADER, &self.config.access_key)
    }

    /// 发送请求并解析统一响应结构
    async fn send_envelope(
        &self,
        request: RequestBuilder,
        action: &str,
    ) -> Result<ApiEnvelope, UploadError> {
        let response = request.send().await.map_err(|e| {
            error!("{}请求发送失败: {}", action, e);
            UploadError::Transport(e)
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            error!("读取{}响应失败: {}", action, e);
            UploadError::Transport(e)
        })?;
        debug!("{}响应: status={}, body={}", action, status, body);

        let envelope = ApiEnvelope::parse(&body).map_err(|e| {
            error!("解析{}响应失败: status={}, {}", action, status, e);
            e
        })?;

        if !envelope.is_success() {
            warn!("{}返回失败: code={}", action, envelope.code);
        }
        Ok(envelope)
    }
}

/// 构建 HTTP 客户端
fn build_http_client(
    connect_timeout: Duration,
    timeout: Option<Duration>,
    accept_invalid_certs: bool,
) -> reqwest::Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(CONNECTION, HeaderValue::from_static("close"));

    let mut builder = Client::builder()
        .default_headers(headers)
        .connect_timeout(connect_timeout)
        .pool_max_idle_per_host(0)
        .danger_accept_invalid_certs(accept_invalid_certs);

    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }

    builder.build()
}

/// 读取整个文件
async fn read_file(path: &Path) -> Result<Vec<u8>, UploadError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| UploadError::file(path, e))
}

/// 构建文件表单字段
fn file_part(path: &Path, data: Vec<u8>) -> Result<multipart::Part, UploadError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());

    multipart::Part::bytes(data)
        .file_name(file_name)
        .mime_str("application/octet-stream")
        .map_err(UploadError::Transport)
}

#[async_trait]
impl ObjectStoreApi for ObjectClient {
    async fn presigned_url(&self, file_key: &str) -> Result<String, UploadError> {
        let url = self.endpoint(&self.config.temp_get_upload_url, file_key);
        debug!("获取临时上传地址: {}", url);

        let request = self.authorized(
            self.transfer_client
                .get(&url)
                .timeout(self.config.read_timeout())
                .query(&[("expireTime", self.config.presigned_expire_ms.to_string())]),
        );

        let response = request.send().await.map_err(|e| {
            error!("获取临时上传地址请求失败: {}", e);
            UploadError::Transport(e)
        })?;

        let status = response.status();
        if status != StatusCode::OK {
            error!("获取临时上传地址失败: status={}", status);
            return Err(UploadError::HttpStatus(status.as_u16()));
        }

        let body = response.text().await?;
        debug!("临时上传地址响应: {}", body);

        let presigned: String = ApiEnvelope::parse(&body)?.into_data()?;
        if presigned.is_empty() {
            return Err(UploadError::Decode("临时上传地址为空".to_string()));
        }
        Ok(presigned)
    }

    async fn put_presigned(&self, url: &str, path: &Path) -> Result<(), UploadError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| UploadError::file(path, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| UploadError::file(path, e))?
            .len();

        info!("通过临时地址上传: {:?}, size={}", path, size);

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let response = self
            .transfer_client
            .put(url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                error!("临时地址上传请求失败: {}", e);
                UploadError::Transport(e)
            })?;

        let status = response.status();
        debug!("临时地址上传响应: status={}", status);
        if status == StatusCode::OK {
            Ok(())
        } else {
            Err(UploadError::HttpStatus(status.as_u16()))
        }
    }

    async fn relay_upload(&self, file_key: &str, path: &Path) -> Result<(), UploadError> {
        let url = self.endpoint(&self.config.post_upload_url, file_key);
        debug!("平台接口上传文件: {}", url);

        let data = read_file(path).await?;
        let form = multipart::Form::new().part("file", file_part(path, data)?);

        let request = self.authorized(self.client.post(&url).multipart(form));
        self.send_envelope(request, "文件上传").await?.into_result()
    }

    async fn multipart_init(&self, file_key: &str) -> Result<String, UploadError> {
        let url = self.endpoint(&self.config.multipart_init_url, file_key);
        debug!("分段上传初始化: {}", url);

        let request = self.authorized(
            self.client
                .post(&url)
                .header(CONTENT_TYPE, JSON_CONTENT_TYPE),
        );
        let data: InitData = self
            .send_envelope(request, "分段上传初始化")
            .await?
            .into_data()?;

        if data.upload_id.is_empty() {
            return Err(UploadError::InitFailed("uploadId 为空".to_string()));
        }
        Ok(data.upload_id)
    }

    async fn upload_part(
        &self,
        file_key: &str,
        part: &PartUpload,
    ) -> Result<PartResult, UploadError> {
        let url = self.endpoint(&self.config.multipart_upload_url, file_key);
        debug!(
            "上传分段: key={}, part={}, position={}, last={}",
            file_key, part.part_number, part.file_position, part.last_part
        );

        let data = read_file(&part.path).await?;
        let mut form = multipart::Form::new()
            .text("uploadId", part.upload_id.clone())
            .text("filePosition", part.file_position.to_string())
            .text("partNumber", part.part_number.to_string());
        if part.last_part {
            form = form.text("lastPart", "true");
        }
        let form = form.part("file", file_part(&part.path, data)?);

        let request = self.authorized(self.client.post(&url).multipart(form));
        let data: PartData = self.send_envelope(request, "分段上传").await?.into_data()?;

        if let Some(returned) = data.part_number {
            if returned != part.part_number {
                warn!(
                    "分段序号不一致: 请求={}, 返回={}",
                    part.part_number, returned
                );
            }
        }

        Ok(PartResult {
            part_number: part.part_number,
            etag: data.etag,
        })
    }

    async fn multipart_complete(
        &self,
        file_key: &str,
        upload_id: &str,
        parts: &[PartResult],
    ) -> Result<(), UploadError> {
        let url = self.endpoint(&self.config.multipart_completion_url, file_key);
        let body = CompletionRequest {
            upload_id,
            part_etags: parts,
        };
        let payload =
            serde_json::to_vec(&body).map_err(|e| UploadError::Decode(e.to_string()))?;
        debug!("完成分段上传: {}, parts={}", url, parts.len());

        let request = self.authorized(
            self.client
                .post(&url)
                .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
                .body(payload),
        );
        self.send_envelope(request, "完成分段上传").await?.into_result()
    }

    async fn multipart_abort(&self, file_key: &str, upload_id: &str) -> Result<(), UploadError> {
        let url = self.endpoint(&self.config.multipart_abortion_url, file_key);
        debug!("取消分段上传: {}, uploadId={}", url, upload_id);

        let form = multipart::Form::new().text("uploadId", upload_id.to_string());
        let request = self.authorized(self.client.post(&url).multipart(form));
        self.send_envelope(request, "取消分段上传").await?.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::extract::{Multipart, Query, State};
    use axum::http::{HeaderMap as AxumHeaderMap, StatusCode as AxumStatus};
    use axum::routing::{get, post, put};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// 模拟服务端记录的请求
    #[derive(Debug, Default)]
    struct Recorded {
        access_keys: Vec<Option<String>>,
        expire_time: Option<String>,
        form_fields: Vec<HashMap<String, String>>,
        put_body_len: Option<usize>,
        put_access_key: Option<String>,
        completion: Option<Value>,
    }

    type Shared = Arc<Mutex<Recorded>>;

    fn access_key(headers: &AxumHeaderMap) -> Option<String> {
        headers
            .get("accessKey")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    }

    async fn read_form(mut multipart: Multipart) -> HashMap<String, String> {
        let mut fields = HashMap::new();
        while let Some(field) = multipart.next_field().await.unwrap() {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                let data = field.bytes().await.unwrap();
                fields.insert("file.len".to_string(), data.len().to_string());
            } else {
                fields.insert(name, field.text().await.unwrap());
            }
        }
        fields
    }

    async fn temp_url(
        State(state): State<Shared>,
        headers: AxumHeaderMap,
        Query(query): Query<HashMap<String, String>>,
    ) -> Json<Value> {
        let mut recorded = state.lock().unwrap();
        recorded.access_keys.push(access_key(&headers));
        recorded.expire_time = query.get("expireTime").cloned();
        Json(json!({"code": "00000", "data": "http://presigned.example/put"}))
    }

    async fn s3_put(State(state): State<Shared>, headers: AxumHeaderMap, body: Bytes) -> AxumStatus {
        let mut recorded = state.lock().unwrap();
        recorded.put_body_len = Some(body.len());
        recorded.put_access_key = access_key(&headers);
        AxumStatus::OK
    }

    async fn relay(
        State(state): State<Shared>,
        headers: AxumHeaderMap,
        multipart: Multipart,
    ) -> Json<Value> {
        let fields = read_form(multipart).await;
        let mut recorded = state.lock().unwrap();
        recorded.access_keys.push(access_key(&headers));
        recorded.form_fields.push(fields);
        Json(json!({"code": "00000", "data": null}))
    }

    async fn init(State(state): State<Shared>, headers: AxumHeaderMap) -> Json<Value> {
        state.lock().unwrap().access_keys.push(access_key(&headers));
        Json(json!({"code": "00000", "data": {"uploadId": "upload-42"}}))
    }

    async fn part(State(state): State<Shared>, multipart: Multipart) -> Json<Value> {
        let fields = read_form(multipart).await;
        let part_number: u32 = fields["partNumber"].parse().unwrap();
        state.lock().unwrap().form_fields.push(fields);
        Json(json!({"code": "00000", "data": {"partNumber": part_number, "etag": format!("etag-{}", part_number)}}))
    }

    async fn complete(State(state): State<Shared>, body: Bytes) -> Json<Value> {
        let value: Value = serde_json::from_slice(&body).unwrap();
        state.lock().unwrap().completion = Some(value);
        Json(json!({"code": "00000", "data": null}))
    }

    async fn abort(State(state): State<Shared>, multipart: Multipart) -> Json<Value> {
        let fields = read_form(multipart).await;
        state.lock().unwrap().form_fields.push(fields);
        Json(json!({"code": "B0001"}))
    }

    async fn limited() -> Json<Value> {
        Json(json!({"code": "A2105", "data": null}))
    }

    async fn broken() -> &'static str {
        "<html>bad gateway</html>"
    }

    async fn server_error() -> AxumStatus {
        AxumStatus::INTERNAL_SERVER_ERROR
    }

    /// 启动本地模拟服务，返回地址
    async fn spawn_server(state: Shared) -> String {
        let router = Router::new()
            .route("/temp/:res/*key", get(temp_url))
            .route("/fail-temp/:res/*key", get(server_error))
            .route("/s3/put", put(s3_put))
            .route("/upload/:res/*key", post(relay))
            .route("/limited/:res/*key", post(limited))
            .route("/broken/:res/*key", post(broken))
            .route("/init/:res/*key", post(init))
            .route("/part/:res/*key", post(part))
            .route("/complete/:res/*key", post(complete))
            .route("/abort/:res/*key", post(abort))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client_for(base: &str) -> ObjectClient {
        let config = ObjectConfig {
            access_key: "test-ak".to_string(),
            res_id: "res-1".to_string(),
            temp_get_upload_url: format!("{}/temp", base),
            post_upload_url: format!("{}/upload", base),
            multipart_init_url: format!("{}/init", base),
            multipart_upload_url: format!("{}/part", base),
            multipart_completion_url: format!("{}/complete", base),
            multipart_abortion_url: format!("{}/abort", base),
            ..ObjectConfig::default()
        };
        ObjectClient::new(Arc::new(config)).unwrap()
    }

    fn write_file(dir: &TempDir, name: &str, size: usize) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, vec![7u8; size]).unwrap();
        path
    }

    #[test]
    fn test_endpoint_encoding() {
        let client = client_for("http://127.0.0.1:1/");
        assert_eq!(
            client.endpoint("http://host/api/", "2024/study a.dcm"),
            "http://host/api/res-1/2024/study%20a.dcm"
        );
    }

    #[tokio::test]
    async fn test_presigned_flow() {
        let state = Shared::default();
        let base = spawn_server(state.clone()).await;
        let client = client_for(&base);
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.dcm", 4096);

        let url = client.presigned_url("a.dcm").await.unwrap();
        assert_eq!(url, "http://presigned.example/put");

        client
            .put_presigned(&format!("{}/s3/put", base), &path)
            .await
            .unwrap();

        let recorded = state.lock().unwrap();
        assert_eq!(recorded.expire_time.as_deref(), Some("60000"));
        assert_eq!(recorded.access_keys, vec![Some("test-ak".to_string())]);
        assert_eq!(recorded.put_body_len, Some(4096));
        assert_eq!(recorded.put_access_key, None);
    }

    #[tokio::test]
    async fn test_presigned_non_200() {
        let base = spawn_server(Shared::default()).await;
        let mut client = client_for(&base);
        let mut config = (*client.config).clone();
        config.temp_get_upload_url = format!("{}/fail-temp", base);
        client.config = Arc::new(config);

        let err = client.presigned_url("a.dcm").await.unwrap_err();
        assert!(matches!(err, UploadError::HttpStatus(500)));
    }

    #[tokio::test]
    async fn test_relay_upload() {
        let state = Shared::default();
        let base = spawn_server(state.clone()).await;
        let client = client_for(&base);
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "b.dcm", 1000);

        client.relay_upload("b.dcm", &path).await.unwrap();

        let recorded = state.lock().unwrap();
        assert_eq!(recorded.access_keys, vec![Some("test-ak".to_string())]);
        assert_eq!(recorded.form_fields[0]["file.len"], "1000");
    }

    #[tokio::test]
    async fn test_rate_limited_and_malformed() {
        let base = spawn_server(Shared::default()).await;
        let mut client = client_for(&base);
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "c.dcm", 10);

        let mut config = (*client.config).clone();
        config.post_upload_url = format!("{}/limited", base);
        client.config = Arc::new(config.clone());
        let err = client.relay_upload("c.dcm", &path).await.unwrap_err();
        assert!(err.is_rate_limited());

        config.post_upload_url = format!("{}/broken", base);
        client.config = Arc::new(config);
        let err = client.relay_upload("c.dcm", &path).await.unwrap_err();
        assert!(matches!(err, UploadError::Decode(_)));
    }

    #[tokio::test]
    async fn test_missing_file_is_file_error() {
        let base = spawn_server(Shared::default()).await;
        let client = client_for(&base);

        let err = client
            .relay_upload("x", Path::new("/definitely/not/here.dcm"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::File { .. }));
    }

    #[tokio::test]
    async fn test_multipart_calls() {
        let state = Shared::default();
        let base = spawn_server(state.clone()).await;
        let client = client_for(&base);
        let dir = TempDir::new().unwrap();
        let chunk = write_file(&dir, "chunk.part2", 300);

        let upload_id = client.multipart_init("big.dcm").await.unwrap();
        assert_eq!(upload_id, "upload-42");

        let part = PartUpload {
            upload_id: upload_id.clone(),
            part_number: 2,
            file_position: 1024,
            last_part: true,
            path: chunk,
        };
        let result = client.upload_part("big.dcm", &part).await.unwrap();
        assert_eq!(result.part_number, 2);
        assert_eq!(result.etag, "etag-2");

        client
            .multipart_complete("big.dcm", &upload_id, &[result])
            .await
            .unwrap();

        // 取消接口返回失败码
        let err = client.multipart_abort("big.dcm", &upload_id).await.unwrap_err();
        assert!(matches!(err, UploadError::Business(_)));

        let recorded = state.lock().unwrap();
        let fields = &recorded.form_fields[0];
        assert_eq!(fields["uploadId"], "upload-42");
        assert_eq!(fields["filePosition"], "1024");
        assert_eq!(fields["partNumber"], "2");
        assert_eq!(fields["lastPart"], "true");
        assert_eq!(fields["file.len"], "300");

        let completion = recorded.completion.as_ref().unwrap();
        assert_eq!(completion["uploadId"], "upload-42");
        assert_eq!(completion["partEtags"][0]["etag"], "etag-2");

        assert_eq!(recorded.form_fields[1]["uploadId"], "upload-42");
    }
}
