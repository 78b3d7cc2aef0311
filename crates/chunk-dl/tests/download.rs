use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chunk_dl::protocol::{
    encode_buffer, ChunkData, ChunkRequestBody, Envelope, DOWNLOAD_ATTACH_PATH,
};
use chunk_dl::{
    BackoffPolicy, ChunkClient, ChunkDownloader, ChunkError, DownloadError, DownloadOptions,
    ProgressCallback,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Serves slices of `payload` the way the proxy does, with injectable failures
struct FakeProxy {
    payload: Vec<u8>,
    /// offset -> (remaining failures, response for each failure)
    failures: Mutex<HashMap<u64, (u32, ResponseTemplate)>>,
}

impl FakeProxy {
    fn new(payload: Vec<u8>) -> Self {
        FakeProxy {
            payload,
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn fail_at(self, offset: u64, times: u32, response: ResponseTemplate) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(offset, (times, response));
        self
    }
}

impl Respond for FakeProxy {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: ChunkRequestBody = request.body_json().unwrap();
        let offset = body.offset.unwrap_or(0);
        let length = body.length.unwrap();

        if let Some((remaining, response)) = self.failures.lock().unwrap().get_mut(&offset) {
            if *remaining > 0 {
                *remaining -= 1;
                return response.clone();
            }
        }

        let total = self.payload.len() as u64;
        if offset >= total && !(offset == 0 && total == 0) {
            return ResponseTemplate::new(416)
                .set_body_json(Envelope::<ChunkData>::error(416, "offset past end"));
        }
        let end = (offset + length).min(total);
        let bytes = &self.payload[offset as usize..end as usize];
        ResponseTemplate::new(200).set_body_json(Envelope::ok(ChunkData {
            total_len: total,
            offset,
            start_pos: offset,
            is_last: end == total,
            buffer: encode_buffer(bytes),
        }))
    }
}

fn payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i * 31 % 251) as u8).collect()
}

fn options(chunk_size: u64, max_retries: u32) -> DownloadOptions {
    DownloadOptions {
        chunk_size,
        max_retries,
        chunk_timeout: Duration::from_secs(5),
        backoff: BackoffPolicy::none(),
    }
}

fn downloader_for(server: &MockServer, options: DownloadOptions) -> ChunkDownloader {
    ChunkDownloader::new(ChunkClient::new(&server.uri()).unwrap(), options)
}

async fn start(proxy: FakeProxy) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DOWNLOAD_ATTACH_PATH))
        .respond_with(proxy)
        .mount(&server)
        .await;
    server
}

fn recorder() -> (Arc<Mutex<Vec<(u64, u64)>>>, ProgressCallback) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = calls.clone();
    let callback: ProgressCallback = Box::new(move |written, total| {
        sink.lock().unwrap().push((written, total));
    });
    (calls, callback)
}

async fn requested_ranges(server: &MockServer) -> Vec<(u64, u64)> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| {
            let body: ChunkRequestBody = r.body_json().unwrap();
            (body.offset.unwrap(), body.length.unwrap())
        })
        .collect()
}

#[tokio::test]
async fn downloads_150000_bytes_in_three_chunks() {
    let data = payload(150_000);
    let server = start(FakeProxy::new(data.clone())).await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("nested").join("attachment.bin");

    let downloader = downloader_for(&server, options(60_000, 3));
    let (calls, callback) = recorder();
    let report = downloader
        .download("att-150k", &dest, Some(callback))
        .await
        .unwrap();

    assert_eq!(
        requested_ranges(&server).await,
        vec![(0, 60_000), (60_000, 60_000), (120_000, 30_000)]
    );
    assert_eq!(
        *calls.lock().unwrap(),
        vec![(60_000, 150_000), (120_000, 150_000), (150_000, 150_000)]
    );
    assert_eq!(report.total_size, 150_000);
    assert_eq!(report.chunks, 3);
    assert_eq!(report.retries, 0);

    let written = std::fs::read(&dest).unwrap();
    assert_eq!(written.len(), 150_000);
    assert_eq!(written, data);
}

#[tokio::test]
async fn reassembles_various_sizes_byte_for_byte() {
    let chunk_size = 1_000u64;
    for size in [1usize, 999, 1_000, 1_001, 3_000, 7_777] {
        let data = payload(size);
        let server = start(FakeProxy::new(data.clone())).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");

        let downloader = downloader_for(&server, options(chunk_size, 0));
        downloader.download("att", &dest, None).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), data, "size {}", size);

        let ranges = requested_ranges(&server).await;
        let offsets: Vec<u64> = ranges.iter().map(|(o, _)| *o).collect();
        let expected: Vec<u64> = (0..size as u64).step_by(chunk_size as usize).collect();
        assert_eq!(offsets, expected, "size {}", size);
    }
}

#[tokio::test]
async fn empty_attachment_creates_empty_file() {
    let server = start(FakeProxy::new(Vec::new())).await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("empty.bin");

    let downloader = downloader_for(&server, options(100, 1));
    let (calls, callback) = recorder();
    let report = downloader.download("empty", &dest, Some(callback)).await.unwrap();

    assert_eq!(report.total_size, 0);
    assert!(calls.lock().unwrap().is_empty());
    assert_eq!(std::fs::metadata(&dest).unwrap().len(), 0);
}

#[tokio::test]
async fn transient_failures_are_retried_on_the_same_chunk() {
    let data = payload(250);
    let proxy = FakeProxy::new(data.clone()).fail_at(
        100,
        2,
        ResponseTemplate::new(502).set_body_json(Envelope::<ChunkData>::error(502, "origin down")),
    );
    let server = start(proxy).await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("out.bin");

    let downloader = downloader_for(&server, options(100, 2));
    let report = downloader.download("att", &dest, None).await.unwrap();

    assert_eq!(report.retries, 2);
    assert_eq!(
        requested_ranges(&server).await,
        vec![(0, 100), (100, 100), (100, 100), (100, 100), (200, 50)]
    );
    assert_eq!(std::fs::read(&dest).unwrap(), data);
}

#[tokio::test]
async fn retry_exhaustion_fails_and_reports_only_completed_chunks() {
    let proxy = FakeProxy::new(payload(150_000)).fail_at(
        60_000,
        u32::MAX,
        ResponseTemplate::new(500).set_body_string("boom"),
    );
    let server = start(proxy).await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("out.bin");

    let downloader = downloader_for(&server, options(60_000, 3));
    let (calls, callback) = recorder();
    let err = downloader
        .download("att", &dest, Some(callback))
        .await
        .unwrap_err();

    match err {
        DownloadError::RetryExhausted {
            offset,
            attempts,
            last_error,
        } => {
            assert_eq!(offset, 60_000);
            assert_eq!(attempts, 4);
            assert!(matches!(last_error, ChunkError::Status { status: 500, .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(*calls.lock().unwrap(), vec![(60_000, 150_000)]);
    // Partial file stays on disk up to the last committed chunk
    assert_eq!(std::fs::metadata(&dest).unwrap().len(), 60_000);
}

#[tokio::test]
async fn invalid_range_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(416)
                .set_body_json(Envelope::<ChunkData>::error(416, "offset past end")),
        )
        .expect(1)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();

    let downloader = downloader_for(&server, options(10, 5));
    let err = downloader
        .download("att", &dir.path().join("out.bin"), None)
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::InvalidRange { offset: 0, .. }));
}

#[tokio::test]
async fn bad_request_is_sent_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(Envelope::<ChunkData>::error(400, "AttachId is empty")),
        )
        .expect(1)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();

    let downloader = downloader_for(&server, options(10, 5));
    let err = downloader
        .download("", &dir.path().join("out.bin"), None)
        .await
        .unwrap_err();

    match err {
        DownloadError::Rejected { offset, reason, .. } => {
            assert_eq!(offset, 0);
            assert!(matches!(reason, ChunkError::Rejected { status: 400, .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(requested_ranges(&server).await, vec![(0, 10)]);
}

#[tokio::test]
async fn timeout_consumes_one_retry() {
    let data = payload(20);
    let slow = ResponseTemplate::new(200)
        .set_body_json(Envelope::ok(ChunkData {
            total_len: 20,
            offset: 0,
            start_pos: 0,
            is_last: true,
            buffer: encode_buffer(&data),
        }))
        .set_delay(Duration::from_secs(2));
    let server = start(FakeProxy::new(data.clone()).fail_at(0, 1, slow)).await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("out.bin");

    let mut opts = options(20, 1);
    opts.chunk_timeout = Duration::from_millis(100);
    let downloader = downloader_for(&server, opts);
    let report = downloader.download("att", &dest, None).await.unwrap();

    assert_eq!(report.retries, 1);
    assert_eq!(std::fs::read(&dest).unwrap(), data);
}

#[tokio::test]
async fn cancellation_stops_between_chunks_and_keeps_partial_file() {
    let server = start(FakeProxy::new(payload(300))).await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("out.bin");

    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = cancelled.clone();
    let callback: ProgressCallback = Box::new(move |_, _| flag.store(true, Ordering::SeqCst));

    let downloader = downloader_for(&server, options(100, 0));
    let err = downloader
        .download_with_cancel("att", &dest, &cancelled, Some(callback))
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::Cancelled { bytes_written: 100 }));
    assert_eq!(requested_ranges(&server).await, vec![(0, 100)]);
    assert_eq!(std::fs::metadata(&dest).unwrap().len(), 100);
}

#[tokio::test]
async fn bool_wrapper_reports_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();

    let ok = chunk_dl::download(
        &server.uri(),
        "att",
        &dir.path().join("out.bin"),
        options(10, 1),
        None,
    )
    .await;

    assert!(!ok);
}
