//! Graphical session discovery and per-user desktop commands.

use livegate_provider::SessionEnvironment;
use log::{debug, info, warn};
use nix::unistd::{geteuid, User};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};

const DEFAULT_RUNTIME_ROOT: &str = "/run/user";
const XWAYLAND_AUTH_PREFIX: &str = ".mutter-Xwaylandauth";

/// Session of the user logged in on the local display.
#[derive(Debug, Clone)]
pub struct DesktopSession {
    runtime_root: PathBuf,
    user: Option<String>,
    bus_address: Option<String>,
}

impl Default for DesktopSession {
    fn default() -> Self {
        Self::new()
    }
}

impl DesktopSession {
    pub fn new() -> Self {
        Self {
            runtime_root: PathBuf::from(DEFAULT_RUNTIME_ROOT),
            user: None,
            bus_address: None,
        }
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Variables exported for `uid` once its session is found.
    fn session_variables(&self, uid: u32) -> Vec<(&'static str, String)> {
        let runtime_dir = self.runtime_root.join(uid.to_string());
        vec![
            ("XDG_RUNTIME_DIR", runtime_dir.display().to_string()),
            (
                "DBUS_SESSION_BUS_ADDRESS",
                format!("unix:path={}", runtime_dir.join("bus").display()),
            ),
            ("WAYLAND_DISPLAY", "wayland-0".to_string()),
            ("DISPLAY", ":0".to_string()),
            (
                "XAUTHORITY",
                find_xauthority(&runtime_dir).display().to_string(),
            ),
        ]
    }

    /// Command line running `program` inside the user's session.
    fn session_command_line(&self, as_root: bool, program: &str, args: &[&str]) -> Vec<String> {
        let mut line = Vec::new();
        if let (true, Some(user)) = (as_root, self.user.as_deref()) {
            line.extend(["sudo", "-H", "-u", user].map(str::to_string));
            if let Some(address) = &self.bus_address {
                line.push(format!("DBUS_SESSION_BUS_ADDRESS={address}"));
            }
        }
        line.push(program.to_string());
        line.extend(args.iter().map(|arg| arg.to_string()));
        line
    }

    fn run_in_session(&self, program: &str, args: &[&str]) -> bool {
        let line = self.session_command_line(geteuid().is_root(), program, args);
        let Some((binary, rest)) = line.split_first() else {
            return false;
        };
        match Command::new(binary).args(rest).output() {
            Ok(output) if output.status.success() => true,
            Ok(output) => {
                warn!(
                    "{program} exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                false
            }
            Err(err) => {
                warn!("could not run {program}: {err}");
                false
            }
        }
    }
}

impl SessionEnvironment for DesktopSession {
    fn define_ui_environment(&mut self) -> bool {
        let output = match Command::new("who").output() {
            Ok(output) => output,
            Err(err) => {
                warn!("could not run who: {err}");
                return false;
            }
        };
        let Some(name) = graphical_user(&String::from_utf8_lossy(&output.stdout)) else {
            debug!("no graphical user logged in yet");
            return false;
        };
        let user = match User::from_name(&name) {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!("logged user {name} missing from the passwd database");
                return false;
            }
            Err(err) => {
                warn!("cannot resolve user {name}: {err}");
                return false;
            }
        };

        let variables = self.session_variables(user.uid.as_raw());
        for (key, value) in &variables {
            env::set_var(key, value);
            if *key == "DBUS_SESSION_BUS_ADDRESS" {
                self.bus_address = Some(value.clone());
            }
        }
        info!("UI environment defined for {name} (uid {})", user.uid);
        self.user = Some(name);
        true
    }

    fn user_setting_set(&self, schema: &str, key: &str, value: &str) {
        if self.run_in_session("gsettings", &["set", schema, key, value]) {
            debug!("set {schema} {key} to {value}");
        }
    }

    /// Returns as soon as `zenity` is started; it is reaped in the background.
    fn notify(&self, message: &str) {
        let line = self.session_command_line(
            geteuid().is_root(),
            "zenity",
            &["--notification", "--text", message],
        );
        spawn_reaped("zenity", &line);
    }
}

/// Start `line` without waiting for it; a named thread collects its status.
fn spawn_reaped(program: &str, line: &[String]) -> Option<JoinHandle<()>> {
    let (binary, rest) = line.split_first()?;
    let mut child = match Command::new(binary)
        .args(rest)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            warn!("could not run {program}: {err}");
            return None;
        }
    };

    let name = program.to_string();
    let reaper = thread::Builder::new()
        .name(format!("reap-{program}"))
        .spawn(move || match child.wait() {
            Ok(status) if status.success() => debug!("{name} finished"),
            Ok(status) => warn!("{name} exited with {status}"),
            Err(err) => warn!("could not wait for {name}: {err}"),
        });
    match reaper {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!("could not start reaper for {program}: {err}");
            None
        }
    }
}

/// First user of `who` output sitting on a local tty or on display `:0`.
fn graphical_user(who: &str) -> Option<String> {
    who.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let user = fields.next()?;
        let line_name = fields.next()?;
        let local = line_name.starts_with("tty")
            || line_name == ":0"
            || line.contains("(:0)")
            || line.contains("(tty");
        local.then(|| user.to_string())
    })
}

/// Prefer the Xwayland cookie written by mutter, else gdm's file.
fn find_xauthority(runtime_dir: &Path) -> PathBuf {
    let mutter = fs::read_dir(runtime_dir).ok().and_then(|entries| {
        entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(XWAYLAND_AUTH_PREFIX))
            })
            .min()
    });
    mutter.unwrap_or_else(|| runtime_dir.join("gdm").join("Xauthority"))
}
