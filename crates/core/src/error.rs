//! 에러 타입 -- 도메인별 에러 정의
//!
//! 파서 단계의 실패(`Truncated`, `UnsupportedLinkType`, `UnsupportedTransport`)는
//! 에러 값이 아니라 `Classification` 변형으로 표현되며 여기에 포함되지 않습니다.

/// portwatch 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum PortwatchError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인 생명주기 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 캡처 싱크 에러
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    /// 커널 프로그램 로드/연결 에러
    #[error("attach error: {0}")]
    Attach(#[from] AttachError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 파이프라인 생명주기 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 파이프라인 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// 이미 실행 중
    #[error("pipeline already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("pipeline not running")]
    NotRunning,
}

/// 캡처 싱크 에러
///
/// 모두 비치명적입니다. 트래픽 전달에는 영향을 주지 않으며 진단으로만 보고됩니다.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    /// 큐 용량 부족으로 예약 실패
    #[error("capture buffer full: requested {requested} bytes, {available} available")]
    BufferFull { requested: usize, available: usize },

    /// 프레임 바이트 복사 실패
    #[error("capture copy failed: needed {needed} bytes, {available} readable")]
    CopyFailure { needed: usize, available: usize },

    /// 소비자가 종료됨
    #[error("capture consumer closed")]
    Closed,
}

/// 커널 프로그램 로드/연결 에러
#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    /// 오브젝트 로드 또는 프로그램 attach 실패
    #[error("program load failed: {0}")]
    ProgramLoad(String),

    /// 맵 접근 실패
    #[error("map error: {0}")]
    Map(String),

    /// 원시 소켓 생성 실패
    #[error("socket error: {0}")]
    Socket(String),

    /// 지원하지 않는 플랫폼
    #[error("unsupported: {0}")]
    Unsupported(String),
}
