use log::info;

/// OS-level proxy settings toggle.
pub trait SystemProxy: Send + Sync {
    /// Points (or stops pointing) the host's proxy settings at `host:port`.
    /// Returns whether the change was applied.
    fn set_system_proxy(&self, enable: bool, host: &str, port: u16) -> bool;
}

/// Leaves the host's proxy settings untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledSystemProxy;

impl SystemProxy for DisabledSystemProxy {
    fn set_system_proxy(&self, enable: bool, host: &str, port: u16) -> bool {
        info!(
            "System proxy integration unavailable, not {} {}:{}",
            if enable { "enabling" } else { "disabling" },
            host,
            port
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_proxy_never_applies() {
        assert!(!DisabledSystemProxy.set_system_proxy(true, "127.0.0.1", 8080));
        assert!(!DisabledSystemProxy.set_system_proxy(false, "127.0.0.1", 8080));
    }
}
