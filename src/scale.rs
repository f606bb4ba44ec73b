use crate::error::{ClipError, ClipResult};
use log::debug;
use rsmpeg::avutil::AVFrame;
use rsmpeg::ffi;
use rsmpeg::swscale::SwsContext;

/// Pixel conversion from the decoder's frames to the encoder's. Source
/// parameters never change after probing, so one context serves a whole job.
pub struct ScalingContext {
    sws: SwsContext,
    src_height: i32,
    dst_width: i32,
    dst_height: i32,
    dst_format: ffi::AVPixelFormat,
}

impl ScalingContext {
    pub fn new(
        src: (i32, i32, ffi::AVPixelFormat),
        dst: (i32, i32, ffi::AVPixelFormat),
    ) -> ClipResult<Self> {
        let (src_width, src_height, src_format) = src;
        let (dst_width, dst_height, dst_format) = dst;
        let sws = SwsContext::get_context(
            src_width,
            src_height,
            src_format,
            dst_width,
            dst_height,
            dst_format,
            ffi::SWS_SPLINE,
            None,
            None,
            None,
        )
        .ok_or_else(|| ClipError::Scale {
            message: format!(
                "no scaler for {}x{} fmt {} -> {}x{} fmt {}",
                src_width, src_height, src_format, dst_width, dst_height, dst_format
            ),
            source: None,
        })?;
        debug!(
            "Scaler {}x{} -> {}x{}",
            src_width, src_height, dst_width, dst_height
        );
        Ok(Self {
            sws,
            src_height,
            dst_width,
            dst_height,
            dst_format,
        })
    }

    /// Converts one decoded frame into a freshly allocated encoder-shaped frame.
    pub fn scale(&mut self, frame: &AVFrame) -> ClipResult<AVFrame> {
        let mut scaled = AVFrame::new();
        scaled.set_width(self.dst_width);
        scaled.set_height(self.dst_height);
        scaled.set_format(self.dst_format);
        scaled.alloc_buffer().map_err(|e| ClipError::Scale {
            message: "could not allocate scaled frame".to_string(),
            source: Some(e),
        })?;
        self.sws
            .scale_frame(frame, 0, self.src_height, &mut scaled)
            .map_err(|e| ClipError::Scale {
                message: "could not convert frame".to_string(),
                source: Some(e),
            })?;
        Ok(scaled)
    }
}
