use crate::connection::ConnectionState;
use flux_config::TransportProtocol;
use tokio::time::Instant;

/// 连接上下文（单个 ConnectionManager 独占）
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub url: String,
    pub protocol: TransportProtocol,
    pub state: ConnectionState,
    pub last_packet: Option<Instant>,
    pub connection_valid: bool,
    pub consecutive_failures: u32,
    pub reconnect_attempt: u32,
    pub running: bool,
}

impl ConnectionContext {
    pub fn new(url: impl Into<String>, protocol: TransportProtocol) -> Self {
        Self {
            url: url.into(),
            protocol,
            state: ConnectionState::Initializing,
            last_packet: None,
            connection_valid: false,
            consecutive_failures: 0,
            reconnect_attempt: 0,
            running: true,
        }
    }

    /// 连接成功：计数清零并记录包时间
    pub fn mark_connected(&mut self, now: Instant) {
        self.connection_valid = true;
        self.consecutive_failures = 0;
        self.reconnect_attempt = 0;
        self.last_packet = Some(now);
    }

    /// 运行中读取失败：进入重连，从第 1 次尝试开始
    pub fn mark_read_failed(&mut self) {
        self.connection_valid = false;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.reconnect_attempt = 1;
    }

    pub fn mark_stopped(&mut self) {
        self.connection_valid = false;
        self.running = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let mut ctx = ConnectionContext::new("rtsp://cam/1", TransportProtocol::Tcp);
        assert_eq!(ctx.state, ConnectionState::Initializing);
        assert!(ctx.running);

        ctx.reconnect_attempt = 7;
        ctx.mark_read_failed();
        ctx.mark_read_failed();
        assert_eq!(ctx.consecutive_failures, 2);
        assert_eq!(ctx.reconnect_attempt, 1);
        assert!(!ctx.connection_valid);

        ctx.mark_connected(Instant::now());
        assert!(ctx.connection_valid);
        assert_eq!(ctx.consecutive_failures, 0);
        assert_eq!(ctx.reconnect_attempt, 0);

        ctx.mark_stopped();
        assert!(!ctx.running);
        assert!(!ctx.connection_valid);
    }
}
