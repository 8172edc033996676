//! Shell script building blocks shared by the init and sidecar generators

use std::fmt::{self, Write};

use crate::mesh::{ENV_HOST_IP, SHELL};

/// Environment variable holding the agent's HTTP address
pub const ENV_CONSUL_HTTP_ADDR: &str = "CONSUL_HTTP_ADDR";

/// Environment variable holding the agent's gRPC address
pub const ENV_CONSUL_GRPC_ADDR: &str = "CONSUL_GRPC_ADDR";

/// Environment variable overriding the server name used for TLS verification
pub const ENV_CONSUL_TLS_SERVER_NAME: &str = "CONSUL_TLS_SERVER_NAME";

/// Escape a value for use inside a double-quoted shell string
pub fn escape_double_quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escape a value for an HCL string literal inside an unquoted heredoc.
///
/// Two layers: HCL needs `\` and `"` escaped, then the heredoc expands `$`,
/// backticks and backslashes, so those are escaped again for the shell.
/// Line breaks become HCL escapes; a raw newline could end the heredoc.
pub fn escape_hcl_heredoc(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str(r"\\\\"),
            '"' => out.push_str(r#"\""#),
            '\n' => out.push_str(r"\n"),
            '\r' => out.push_str(r"\r"),
            '$' | '`' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Write `export VAR="[https://]${HOST_IP}:port"`
pub fn write_addr_export(out: &mut String, var: &str, tls: bool, port: u16) -> fmt::Result {
    let scheme = if tls { "https://" } else { "" };
    writeln!(out, r#"export {var}="{scheme}${{{ENV_HOST_IP}}}:{port}""#)
}

/// Write the TLS server name export, if one is configured
pub fn write_tls_server_name(out: &mut String, server_name: Option<&str>) -> fmt::Result {
    match server_name {
        Some(name) if !name.is_empty() => writeln!(
            out,
            r#"export {ENV_CONSUL_TLS_SERVER_NAME}="{}""#,
            escape_double_quoted(name)
        ),
        _ => Ok(()),
    }
}

/// Wrap a script into a container command running it under `sh -ec`
pub fn shell_command(script: impl Into<String>) -> Vec<String> {
    SHELL
        .iter()
        .map(|s| s.to_string())
        .chain(std::iter::once(script.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_export_plain() {
        let mut out = String::new();
        write_addr_export(&mut out, ENV_CONSUL_HTTP_ADDR, false, 8500).expect("write");
        assert_eq!(out, "export CONSUL_HTTP_ADDR=\"${HOST_IP}:8500\"\n");
    }

    #[test]
    fn test_addr_export_tls() {
        let mut out = String::new();
        write_addr_export(&mut out, ENV_CONSUL_GRPC_ADDR, true, 8502).expect("write");
        assert_eq!(out, "export CONSUL_GRPC_ADDR=\"https://${HOST_IP}:8502\"\n");
    }

    #[test]
    fn test_tls_server_name_only_when_set() {
        let mut out = String::new();
        write_tls_server_name(&mut out, None).expect("write");
        write_tls_server_name(&mut out, Some("")).expect("write");
        assert!(out.is_empty());

        write_tls_server_name(&mut out, Some("server.dc1.consul")).expect("write");
        assert_eq!(
            out,
            "export CONSUL_TLS_SERVER_NAME=\"server.dc1.consul\"\n"
        );
    }

    #[test]
    fn test_escape_double_quoted() {
        assert_eq!(escape_double_quoted("web"), "web");
        assert_eq!(escape_double_quoted(r#"a"b$c`d\e"#), r#"a\"b\$c\`d\\e"#);
    }

    #[test]
    fn test_escape_hcl_heredoc() {
        assert_eq!(escape_hcl_heredoc("web-v2"), "web-v2");
        assert_eq!(escape_hcl_heredoc(r#"a"b"#), r#"a\"b"#);
        assert_eq!(escape_hcl_heredoc("$(id)"), r"\$(id)");
        assert_eq!(escape_hcl_heredoc(r"a\b"), r"a\\\\b");
        assert_eq!(escape_hcl_heredoc("a\nb\r"), r"a\nb\r");
        assert!(!escape_hcl_heredoc("db\nEOF\n").contains('\n'));
    }

    #[test]
    fn test_shell_command() {
        assert_eq!(
            shell_command("echo hi"),
            vec!["/bin/sh".to_string(), "-ec".to_string(), "echo hi".to_string()]
        );
    }
}
