// RTSP 协议支持
use super::{MediaSource, MediaTransport};
use crate::error::TransportError;
use crate::protocol::ProtocolSettings;
use crate::stream::{CodecParameters, MediaPacket, SourceInfo};
use async_trait::async_trait;
use bytes::Bytes;
use flux_config::TransportProtocol;
use futures::StreamExt;
use retina::client::{
    Credentials, Demuxed, PlayOptions, Session, SessionOptions, SetupOptions, Transport,
};
use retina::codec::{CodecItem, ParametersRef};
use std::pin::Pin;
use tracing::{debug, info};
use url::Url;

/// 基于 retina 的 RTSP 传输
#[derive(Debug, Clone, Default)]
pub struct RtspTransport {
    user_agent: Option<String>,
}

impl RtspTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    fn credentials(url: &Url) -> Option<Credentials> {
        if url.username().is_empty() {
            return None;
        }
        Some(Credentials {
            username: url.username().to_string(),
            password: url.password().unwrap_or("").to_string(),
        })
    }

    fn transport_for(protocol: TransportProtocol) -> Transport {
        if protocol.is_udp() {
            Transport::Udp(Default::default())
        } else {
            Transport::Tcp(Default::default())
        }
    }

    fn codec_parameters(stream: &retina::client::Stream) -> CodecParameters {
        let mut params = CodecParameters {
            codec: stream.encoding_name().to_string(),
            clock_rate: stream.clock_rate_hz(),
            ..Default::default()
        };
        if let Some(ParametersRef::Video(video)) = stream.parameters() {
            let (width, height) = video.pixel_dimensions();
            params.width = Some(width);
            params.height = Some(height);
            params.extra_data = Bytes::copy_from_slice(video.extra_data());
        }
        params
    }
}

#[async_trait]
impl MediaTransport for RtspTransport {
    async fn open(
        &self,
        url: &str,
        protocol: TransportProtocol,
    ) -> Result<Box<dyn MediaSource>, TransportError> {
        let parsed =
            Url::parse(url).map_err(|e| TransportError::Open(format!("invalid url: {}", e)))?;

        let mut options = SessionOptions::default().creds(Self::credentials(&parsed));
        if let Some(user_agent) = &self.user_agent {
            options = options.user_agent(user_agent.clone());
        }

        let mut session = Session::describe(parsed, options)
            .await
            .map_err(|e| TransportError::Open(format!("describe failed: {}", e)))?;

        let video_index = session
            .streams()
            .iter()
            .position(|s| s.media() == "video")
            .ok_or(TransportError::NoVideoStream)?;
        let audio_index = session.streams().iter().position(|s| s.media() == "audio");

        let info = SourceInfo {
            video_index,
            video: Self::codec_parameters(&session.streams()[video_index]),
            audio_index,
            audio: audio_index.map(|i| Self::codec_parameters(&session.streams()[i])),
        };

        for index in std::iter::once(video_index).chain(audio_index) {
            session
                .setup(
                    index,
                    SetupOptions::default().transport(Self::transport_for(protocol)),
                )
                .await
                .map_err(|e| TransportError::Open(format!("setup failed: {}", e)))?;
        }

        let demuxed = session
            .play(PlayOptions::default())
            .await
            .map_err(|e| TransportError::Open(format!("play failed: {}", e)))?
            .demuxed()
            .map_err(|e| TransportError::Open(format!("demux failed: {}", e)))?;

        let settings = ProtocolSettings::for_protocol(protocol);
        info!(
            protocol = %protocol,
            codec = %info.video.codec,
            buffer_size = settings.buffer_size,
            has_audio = audio_index.is_some(),
            "RTSP source opened"
        );

        Ok(Box::new(RtspSource {
            session: Some(Box::pin(demuxed)),
            info,
        }))
    }
}

/// 已播放的 RTSP 会话
pub struct RtspSource {
    session: Option<Pin<Box<Demuxed>>>,
    info: SourceInfo,
}

impl RtspSource {
    fn convert(&self, item: CodecItem) -> Option<MediaPacket> {
        match item {
            CodecItem::VideoFrame(frame) => Some(
                MediaPacket::video(
                    Bytes::copy_from_slice(frame.data()),
                    Some(frame.timestamp().elapsed()),
                    frame.is_random_access_point(),
                )
                .with_stream_index(frame.stream_id()),
            ),
            CodecItem::AudioFrame(frame) => Some(MediaPacket::audio(
                Bytes::copy_from_slice(frame.data()),
                Some(frame.timestamp().elapsed()),
                frame.stream_id(),
            )),
            _ => None,
        }
    }
}

#[async_trait]
impl MediaSource for RtspSource {
    fn source_info(&self) -> &SourceInfo {
        &self.info
    }

    async fn read_packet(&mut self) -> Result<Option<MediaPacket>, TransportError> {
        loop {
            let session = self.session.as_mut().ok_or(TransportError::Closed)?;
            match session.next().await {
                Some(Ok(item)) => {
                    if let Some(packet) = self.convert(item) {
                        return Ok(Some(packet));
                    }
                }
                Some(Err(e)) => return Err(TransportError::Read(e.to_string())),
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) {
        if self.session.take().is_some() {
            debug!("RTSP session closed");
        }
    }
}
