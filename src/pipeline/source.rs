// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 帧来源 (摄像头 / 录制视频 / 屏幕), 只按需提供当前帧, 不主动推送
use crate::config::SourceKind;
use crate::detection::types::{Frame, FrameSize};

pub trait FrameSource {
    /// 当前帧, 来源暂无画面时返回 None
    fn current_frame(&self) -> Option<Frame>;

    fn kind(&self) -> SourceKind;

    fn frame_size(&self) -> Option<FrameSize> {
        self.current_frame().map(|f| f.size())
    }
}

/// 固定一帧的来源
pub struct StaticFrameSource {
    frame: Option<Frame>,
    kind: SourceKind,
}

impl StaticFrameSource {
    pub fn new(frame: Frame, kind: SourceKind) -> Self {
        Self {
            frame: Some(frame),
            kind,
        }
    }

    pub fn empty(kind: SourceKind) -> Self {
        Self { frame: None, kind }
    }

    pub fn set_frame(&mut self, frame: Frame) {
        self.frame = Some(frame);
    }
}

impl FrameSource for StaticFrameSource {
    fn current_frame(&self) -> Option<Frame> {
        self.frame.clone()
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }
}
