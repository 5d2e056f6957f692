// 测试用的远端接口与结果接收方

use crate::error::UploadError;
use crate::status::StatusSink;
use crate::storage::{ObjectStoreApi, PartUpload};
use crate::uploader::{FileType, PartResult};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

/// 远端接口调用记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    PresignedUrl(String),
    PutPresigned(String),
    Relay(String),
    Init(String),
    Part(u32),
    Complete(String),
    Abort(String),
}

#[derive(Default)]
struct FakeState {
    calls: Vec<ApiCall>,
    parts: Vec<PartUpload>,
    completed: Option<Vec<PartResult>>,
    presigned_error: Option<UploadError>,
    put_errors: VecDeque<UploadError>,
    relay_errors: VecDeque<UploadError>,
    init_error: Option<UploadError>,
    part_errors: HashMap<u32, UploadError>,
    complete_error: Option<UploadError>,
    abort_error: Option<UploadError>,
}

/// 内存中的远端接口，默认全部成功
#[derive(Default)]
pub struct FakeApi {
    state: Mutex<FakeState>,
}

impl FakeApi {
    pub fn calls(&self) -> Vec<ApiCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn uploaded_parts(&self) -> Vec<PartUpload> {
        self.state.lock().unwrap().parts.clone()
    }

    pub fn completed_parts(&self) -> Option<Vec<PartResult>> {
        self.state.lock().unwrap().completed.clone()
    }

    pub fn fail_presigned(&self, err: UploadError) {
        self.state.lock().unwrap().presigned_error = Some(err);
    }

    /// 依次作为后续 PUT 的结果，用完后恢复成功
    pub fn put_results(&self, errors: Vec<UploadError>) {
        self.state.lock().unwrap().put_errors.extend(errors);
    }

    /// 依次作为后续平台上传的结果，用完后恢复成功
    pub fn relay_results(&self, errors: Vec<UploadError>) {
        self.state.lock().unwrap().relay_errors.extend(errors);
    }

    pub fn fail_init(&self, err: UploadError) {
        self.state.lock().unwrap().init_error = Some(err);
    }

    pub fn fail_part(&self, part_number: u32, err: UploadError) {
        self.state.lock().unwrap().part_errors.insert(part_number, err);
    }

    pub fn fail_complete(&self, err: UploadError) {
        self.state.lock().unwrap().complete_error = Some(err);
    }

    pub fn fail_abort(&self, err: UploadError) {
        self.state.lock().unwrap().abort_error = Some(err);
    }

    fn record(&self, call: ApiCall) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl ObjectStoreApi for FakeApi {
    async fn presigned_url(&self, file_key: &str) -> Result<String, UploadError> {
        self.record(ApiCall::PresignedUrl(file_key.to_string()));
        match self.state.lock().unwrap().presigned_error.take() {
            Some(err) => Err(err),
            None => Ok(format!("presigned://{}", file_key)),
        }
    }

    async fn put_presigned(&self, url: &str, _path: &Path) -> Result<(), UploadError> {
        self.record(ApiCall::PutPresigned(url.to_string()));
        match self.state.lock().unwrap().put_errors.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn relay_upload(&self, file_key: &str, _path: &Path) -> Result<(), UploadError> {
        self.record(ApiCall::Relay(file_key.to_string()));
        match self.state.lock().unwrap().relay_errors.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn multipart_init(&self, file_key: &str) -> Result<String, UploadError> {
        self.record(ApiCall::Init(file_key.to_string()));
        match self.state.lock().unwrap().init_error.take() {
            Some(err) => Err(err),
            None => Ok("upload-1".to_string()),
        }
    }

    async fn upload_part(
        &self,
        _file_key: &str,
        part: &PartUpload,
    ) -> Result<PartResult, UploadError> {
        // 上传时分段文件必须存在
        assert!(part.path.exists(), "分段文件不存在: {:?}", part.path);

        let mut state = self.state.lock().unwrap();
        state.calls.push(ApiCall::Part(part.part_number));
        state.parts.push(part.clone());
        match state.part_errors.remove(&part.part_number) {
            Some(err) => Err(err),
            None => Ok(PartResult {
                part_number: part.part_number,
                etag: format!("etag-{}", part.part_number),
            }),
        }
    }

    async fn multipart_complete(
        &self,
        _file_key: &str,
        upload_id: &str,
        parts: &[PartResult],
    ) -> Result<(), UploadError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(ApiCall::Complete(upload_id.to_string()));
        match state.complete_error.take() {
            Some(err) => Err(err),
            None => {
                state.completed = Some(parts.to_vec());
                Ok(())
            }
        }
    }

    async fn multipart_abort(&self, _file_key: &str, upload_id: &str) -> Result<(), UploadError> {
        self.record(ApiCall::Abort(upload_id.to_string()));
        match self.state.lock().unwrap().abort_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// 记录全部上传结果
#[derive(Default)]
pub struct RecordingSink {
    outcomes: Mutex<Vec<(i64, FileType, String, bool)>>,
}

impl RecordingSink {
    pub fn outcomes(&self) -> Vec<(i64, FileType, String, bool)> {
        self.outcomes.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusSink for RecordingSink {
    async fn report_outcome(
        &self,
        target_key: i64,
        file_type: FileType,
        file_key: &str,
        success: bool,
    ) -> anyhow::Result<()> {
        self.outcomes
            .lock()
            .unwrap()
            .push((target_key, file_type, file_key.to_string(), success));
        Ok(())
    }
}
