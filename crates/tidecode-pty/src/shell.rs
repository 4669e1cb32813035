//! Shell detection and command quoting.

/// The shell families the multiplexer knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellKind {
    /// sh, bash, zsh, fish and friends.
    Posix,
    /// cmd.exe.
    Cmd,
    /// PowerShell (powershell.exe, pwsh).
    PowerShell,
}

impl ShellKind {
    /// Detect the shell family from a command path.
    pub fn detect(command: &str) -> Self {
        let base = command
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(command)
            .to_ascii_lowercase();
        let base = base.strip_suffix(".exe").unwrap_or(&base);

        match base {
            "powershell" | "pwsh" => ShellKind::PowerShell,
            "cmd" => ShellKind::Cmd,
            _ => ShellKind::Posix,
        }
    }

    /// Whether `-l` (login shell) applies.
    pub fn is_posix(&self) -> bool {
        matches!(self, ShellKind::Posix)
    }

    /// The change-directory command for this shell, newline-terminated so
    /// it can be written straight into the child's stdin.
    pub fn cd_command(&self, directory: &str) -> String {
        match self {
            ShellKind::Posix => {
                // Single-quote, escaping embedded single quotes.
                let quoted = directory.replace('\'', r"'\''");
                format!("cd -- '{quoted}'\n")
            }
            ShellKind::Cmd => format!("cd /d \"{directory}\"\r\n"),
            ShellKind::PowerShell => {
                // PowerShell doubles single quotes inside literals.
                let quoted = directory.replace('\'', "''");
                format!("Set-Location -LiteralPath '{quoted}'\n")
            }
        }
    }
}

/// The user's preferred shell.
pub fn default_shell() -> String {
    #[cfg(windows)]
    {
        std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string())
    }
    #[cfg(not(windows))]
    {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect() {
        assert_eq!(ShellKind::detect("/bin/bash"), ShellKind::Posix);
        assert_eq!(ShellKind::detect("/usr/bin/zsh"), ShellKind::Posix);
        assert_eq!(ShellKind::detect("fish"), ShellKind::Posix);
        assert_eq!(ShellKind::detect("cmd.exe"), ShellKind::Cmd);
        assert_eq!(
            ShellKind::detect(r"C:\Windows\System32\cmd.exe"),
            ShellKind::Cmd
        );
        assert_eq!(ShellKind::detect("pwsh"), ShellKind::PowerShell);
        assert_eq!(
            ShellKind::detect(r"C:\Program Files\PowerShell\7\pwsh.exe"),
            ShellKind::PowerShell
        );
        assert_eq!(ShellKind::detect("powershell.exe"), ShellKind::PowerShell);
    }

    #[test]
    fn test_posix_cd_quoting() {
        assert_eq!(
            ShellKind::Posix.cd_command("/home/user/projects"),
            "cd -- '/home/user/projects'\n"
        );
        // Embedded single quote survives the quoting.
        assert_eq!(
            ShellKind::Posix.cd_command("/tmp/it's here"),
            "cd -- '/tmp/it'\\''s here'\n"
        );
    }

    #[test]
    fn test_cmd_cd() {
        assert_eq!(
            ShellKind::Cmd.cd_command(r"C:\Users\dev\project"),
            "cd /d \"C:\\Users\\dev\\project\"\r\n"
        );
    }

    #[test]
    fn test_powershell_cd_quoting() {
        assert_eq!(
            ShellKind::PowerShell.cd_command("C:\\it's here"),
            "Set-Location -LiteralPath 'C:\\it''s here'\n"
        );
    }

    #[test]
    fn test_default_shell_nonempty() {
        assert!(!default_shell().is_empty());
    }
}
