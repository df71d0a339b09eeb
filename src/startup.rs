//! Registration of a boot/login task that runs `nvtune --apply-profiles`.
//!
//! Each platform gets its own [`StartupRegistrar`]; the UI only sees the
//! boolean result.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, warn};

pub const SERVICE_NAME: &str = "nvtune";
pub const APPLY_ARG: &str = "--apply-profiles";
pub const CONFIG_DIR_ARG: &str = "--config-dir";

pub trait StartupRegistrar {
    /// Returns true when the task is installed afterwards.
    fn register_startup_task(&self) -> bool;
    /// Returns true when the task is gone afterwards.
    fn unregister_startup_task(&self) -> bool;
}

// Runs a command with its output discarded
fn run_quiet(command: &mut Command) -> bool {
    match command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) => status.success(),
        Err(e) => {
            debug!("failed to spawn {:?}: {}", command, e);
            false
        }
    }
}

fn current_exe() -> Option<PathBuf> {
    match std::env::current_exe() {
        Ok(path) => Some(path),
        Err(e) => {
            warn!("Cannot determine the executable path: {}", e);
            None
        }
    }
}

#[cfg(target_os = "linux")]
pub use self::systemd::SystemdRegistrar as PlatformRegistrar;
#[cfg(windows)]
pub use self::schtasks::ScheduledTaskRegistrar as PlatformRegistrar;
#[cfg(not(any(target_os = "linux", windows)))]
pub use self::unsupported::UnsupportedRegistrar as PlatformRegistrar;

pub fn platform_registrar(config_dir: &Path) -> Box<dyn StartupRegistrar> {
    Box::new(PlatformRegistrar::new(config_dir))
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
mod systemd {
    use super::*;

    /// A oneshot system unit, enabled through `pkexec`.
    pub struct SystemdRegistrar {
        config_dir: PathBuf,
        user: String,
    }

    impl SystemdRegistrar {
        pub fn new(config_dir: &Path) -> Self {
            let user = std::env::var("SUDO_USER")
                .or_else(|_| std::env::var("USER"))
                .unwrap_or_else(|_| "root".to_string());
            Self {
                config_dir: config_dir.to_path_buf(),
                user,
            }
        }

        pub fn unit_name(&self) -> String {
            format!("{}-{}.service", SERVICE_NAME, self.user)
        }

        fn unit_path(&self) -> PathBuf {
            Path::new("/etc/systemd/system").join(self.unit_name())
        }

        pub fn render_unit(&self, exe: &Path) -> String {
            format!(
                "[Unit]\n\
                 Description=Apply {name} profiles on startup for {user}\n\
                 After=multi-user.target\n\
                 \n\
                 [Service]\n\
                 Type=oneshot\n\
                 Environment=\"NVTUNE_CONFIG_DIR={config}\"\n\
                 ExecStart={exe} {arg}\n\
                 \n\
                 [Install]\n\
                 WantedBy=multi-user.target\n",
                name = SERVICE_NAME,
                user = self.user,
                config = self.config_dir.display(),
                exe = exe.display(),
                arg = APPLY_ARG,
            )
        }

        fn is_enabled(&self) -> bool {
            run_quiet(Command::new("systemctl").args(["is-enabled", &self.unit_name()]))
        }
    }

    impl StartupRegistrar for SystemdRegistrar {
        fn register_startup_task(&self) -> bool {
            let Some(exe) = current_exe() else {
                return false;
            };
            let script = format!(
                "cat > {path} << 'EOF'\n{unit}EOF\nsystemctl daemon-reload\nsystemctl enable {name}",
                path = self.unit_path().display(),
                unit = self.render_unit(&exe),
                name = self.unit_name(),
            );
            run_quiet(Command::new("pkexec").args(["sh", "-c", &script]));
            self.is_enabled()
        }

        fn unregister_startup_task(&self) -> bool {
            let script = format!(
                "systemctl disable {name}\nrm -f {path}\nsystemctl daemon-reload",
                name = self.unit_name(),
                path = self.unit_path().display(),
            );
            run_quiet(Command::new("pkexec").args(["sh", "-c", &script]));
            !self.is_enabled()
        }
    }
}

#[cfg_attr(not(windows), allow(dead_code))]
mod schtasks {
    use super::*;

    /// A Task Scheduler entry that runs at logon as SYSTEM.
    ///
    /// SYSTEM has its own profile, so the task is told where the user's
    /// configuration lives.
    pub struct ScheduledTaskRegistrar {
        config_dir: PathBuf,
    }

    impl ScheduledTaskRegistrar {
        pub fn new(config_dir: &Path) -> Self {
            Self {
                config_dir: config_dir.to_path_buf(),
            }
        }

        pub fn task_action(&self, exe: &Path) -> String {
            format!(
                "\"{}\" {} {} \"{}\"",
                exe.display(),
                APPLY_ARG,
                CONFIG_DIR_ARG,
                self.config_dir.display()
            )
        }
    }

    impl StartupRegistrar for ScheduledTaskRegistrar {
        fn register_startup_task(&self) -> bool {
            let Some(exe) = current_exe() else {
                return false;
            };
            let action = self.task_action(&exe);
            run_quiet(Command::new("schtasks").args([
                "/create",
                "/tn",
                SERVICE_NAME,
                "/tr",
                &action,
                "/sc",
                "ONLOGON",
                "/ru",
                "SYSTEM",
                "/f",
            ]))
        }

        fn unregister_startup_task(&self) -> bool {
            run_quiet(Command::new("schtasks").args(["/delete", "/tn", SERVICE_NAME, "/f"]))
        }
    }
}

#[cfg_attr(any(target_os = "linux", windows), allow(dead_code))]
mod unsupported {
    use super::*;

    pub struct UnsupportedRegistrar;

    impl UnsupportedRegistrar {
        pub fn new(_config_dir: &Path) -> Self {
            Self
        }
    }

    impl StartupRegistrar for UnsupportedRegistrar {
        fn register_startup_task(&self) -> bool {
            warn!("Startup registration is not supported on this platform.");
            false
        }

        fn unregister_startup_task(&self) -> bool {
            warn!("Startup registration is not supported on this platform.");
            false
        }
    }
}
