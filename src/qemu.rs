use crate::{
    process::{self, Finished},
    Config, Endpoint, Error, NetworkMode, Paths, Provider, ProvisionStep, Result, StepStatus,
    VmHandle, VmRequest,
};
use std::{
    collections::BTreeMap,
    fs,
    path::Path,
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, info};

#[cfg(target_arch = "x86_64")]
const QEMU_RUNNER: &str = "qemu-system-x86_64";
#[cfg(target_arch = "x86_64")]
const QEMU_MACHINE: &str = "q35";
#[cfg(target_arch = "aarch64")]
const QEMU_RUNNER: &str = "qemu-system-aarch64";
#[cfg(target_arch = "aarch64")]
const QEMU_MACHINE: &str = "virt,highmem=on";
const QEMU_IMAGER: &str = "qemu-img";
const SSH_PORT: u16 = 22;
const SSH_PROBE_INTERVAL: Duration = Duration::from_secs(5);
// Exit code of coreutils `timeout` when the deadline hits.
const TIMEOUT_EXIT_CODE: i32 = 124;
const TIMEOUT_KILL_AFTER: &str = "--kill-after=10";

fn path_str(path: &Path) -> Result<&str> {
    path.to_str().ok_or(Error::InvalidPath { path: path.into() })
}

/// QEMU arguments and SSH endpoint for a network mode.
fn network_args(
    config: &Config,
    hostname: &str,
    network: &NetworkMode,
) -> (Vec<String>, Option<Endpoint>) {
    let bridged = |bridge: &str| {
        vec![
            "-netdev".to_string(),
            format!("bridge,id=net0,br={bridge}"),
            "-device".to_string(),
            "virtio-net-pci,netdev=net0".to_string(),
        ]
    };

    match network {
        NetworkMode::None => (vec!["-nic".into(), "none".into()], None),
        NetworkMode::Forwarded { port } => (
            vec![
                "-net".into(),
                format!("user,hostfwd=tcp::{port}-:{SSH_PORT}"),
                "-net".into(),
                "nic".into(),
            ],
            Some(Endpoint {
                host: "localhost".into(),
                port: *port,
            }),
        ),
        NetworkMode::PrivateNetwork { ip } => (
            bridged(&config.private_bridge),
            Some(Endpoint {
                host: ip.to_string(),
                port: SSH_PORT,
            }),
        ),
        NetworkMode::PublicNetwork => (
            bridged(&config.public_bridge),
            Some(Endpoint {
                host: hostname.into(),
                port: SSH_PORT,
            }),
        ),
    }
}

/// Guest-side argv for a privileged step. The guest enforces the deadline too,
/// since killing the local ssh client leaves the remote shell running.
fn remote_command(timeout: Option<Duration>) -> Vec<String> {
    let mut argv = vec!["sudo".to_string()];
    if let Some(timeout) = timeout {
        argv.push("timeout".into());
        argv.push(TIMEOUT_KILL_AFTER.into());
        argv.push(format!("{}s", timeout.as_secs().max(1)));
    }
    argv.push("sh".into());
    argv.push("-s".into());
    argv
}

/// Drives `qemu-img` and `qemu-system-*` on the local host and reaches guests
/// over SSH.
pub struct QemuProvider {
    paths: Paths,
    config: Config,
    requests: BTreeMap<String, VmRequest>,
}

impl QemuProvider {
    pub fn new(paths: Paths, config: Config) -> Self {
        Self {
            paths,
            config,
            requests: BTreeMap::new(),
        }
    }

    fn allocate_overlay(&self, base: &Path, overlay: &Path) -> Result<()> {
        let status = Command::new(QEMU_IMAGER)
            .arg("create")
            .args(["-f", "qcow2"])
            .args(["-b", path_str(base)?])
            .args(["-F", "qcow2"])
            .arg(path_str(overlay)?)
            .stdout(Stdio::null())
            .status()?;

        if !status.success() {
            return Err(Error::CreateFailed {
                name: overlay.display().to_string(),
                reason: format!("{QEMU_IMAGER} exited with {status}"),
            });
        }
        Ok(())
    }

    fn qemu_command(&self, request: &VmRequest, network: &NetworkMode) -> Result<Command> {
        let disk = self.paths.machine(&request.hostname);
        let (net_args, _) = network_args(&self.config, &request.hostname, network);

        let mut cmd = Command::new(QEMU_RUNNER);
        cmd.args(["-M", QEMU_MACHINE])
            .args(["-accel", &self.config.accel])
            .args(["-cpu", "host"])
            .args(["-smp", &format!("{}", request.cpu_count)])
            .args(["-m", &format!("{}M", request.memory_mb)])
            .args([
                "-smbios",
                &format!("type=1,serial=ds=nocloud;h={}", request.hostname),
            ]);

        if let Some(uefi) = &self.config.uefi {
            cmd.args(["-bios", path_str(uefi)?]);
        }

        cmd.args([
            "-drive",
            &format!(
                "file={},if=none,cache=writethrough,id=hd0",
                path_str(&disk)?
            ),
        ])
        .args(["-device", "virtio-blk-pci,drive=hd0"])
        .args(net_args)
        .arg("-nographic");
        Ok(cmd)
    }

    fn ssh_command(&self, endpoint: &Endpoint) -> Result<Command> {
        let mut cmd = Command::new("ssh");
        cmd.args(["-p", &endpoint.port.to_string()])
            .args(["-o", "BatchMode=yes"])
            .args(["-o", "StrictHostKeyChecking=accept-new"])
            .args(["-o", "ConnectTimeout=10"])
            .arg(format!("{}@{}", self.config.ssh_user()?, endpoint.host));
        Ok(cmd)
    }

    fn wait_for_ssh(&self, vm: &VmHandle, endpoint: &Endpoint) -> Result<()> {
        let deadline = Instant::now() + self.config.boot_timeout();
        loop {
            let status = self
                .ssh_command(endpoint)?
                .arg("true")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()?;
            if status.success() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::NetworkAttachFailed {
                    name: vm.name.clone(),
                    reason: format!(
                        "ssh on {endpoint} not reachable within {:?}",
                        self.config.boot_timeout()
                    ),
                });
            }
            debug!("waiting for ssh on {endpoint}");
            thread::sleep(SSH_PROBE_INTERVAL);
        }
    }
}

impl Provider for QemuProvider {
    fn create_vm(&mut self, request: &VmRequest) -> Result<VmHandle> {
        let base = self.paths.image(&request.base_image);
        if fs::metadata(&base).is_err() {
            return Err(Error::ImageNotFound {
                image: request.base_image.clone(),
                path: base,
            });
        }

        self.paths.setup()?;
        let overlay = self.paths.machine(&request.hostname);
        if fs::metadata(&overlay).is_ok() {
            info!("reusing existing disk {}", overlay.display());
        } else {
            self.allocate_overlay(&base, &overlay)?;
        }

        self.requests
            .insert(request.hostname.clone(), request.clone());
        Ok(VmHandle::new(&request.hostname))
    }

    fn attach_network(&mut self, vm: &mut VmHandle, network: &NetworkMode) -> Result<()> {
        if *network == NetworkMode::None {
            return Err(Error::NetworkAttachFailed {
                name: vm.name.clone(),
                reason: "no network; steps cannot reach the guest".into(),
            });
        }

        let request = self
            .requests
            .get(&vm.name)
            .ok_or(Error::InvalidMachine {
                name: vm.name.clone(),
            })?;
        let disk = self.paths.machine(&vm.name);

        if process::resource_in_use(&self.paths.process_lock(), &disk)? {
            info!("{} is already running", vm.name);
        } else {
            let mut child = self
                .qemu_command(request, network)?
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()?;
            info!("launched {} (pid {})", vm.name, child.id());

            thread::sleep(Duration::from_secs(1));
            if let Some(status) = child.try_wait()? {
                return Err(Error::NetworkAttachFailed {
                    name: vm.name.clone(),
                    reason: format!("{QEMU_RUNNER} exited early with {status}"),
                });
            }
        }

        let (_, endpoint) = network_args(&self.config, &vm.name, network);
        if let Some(endpoint) = &endpoint {
            self.wait_for_ssh(vm, endpoint)?;
        }
        vm.endpoint = endpoint;
        Ok(())
    }

    fn run_privileged(
        &mut self,
        vm: &VmHandle,
        step: &ProvisionStep,
        timeout: Option<Duration>,
    ) -> Result<StepStatus> {
        let endpoint = vm.endpoint.as_ref().ok_or(Error::Unreachable {
            name: vm.name.clone(),
        })?;

        let mut child = self
            .ssh_command(endpoint)?
            .args(remote_command(timeout))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut script = step.command.clone().into_bytes();
        script.push(b'\n');
        process::feed_stdin(&mut child, &script)?;

        let Finished { status, output } = process::wait_with_timeout(child, timeout)?;
        Ok(match status {
            Some(status) if timeout.is_some() && status.code() == Some(TIMEOUT_EXIT_CODE) => {
                StepStatus::TimedOut { output }
            }
            Some(status) => StepStatus::Exited {
                exit_code: status.code(),
                output,
            },
            None => StepStatus::TimedOut { output },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{ffi::OsStr, net::Ipv4Addr};

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(OsStr::to_string_lossy)
            .map(|arg| arg.into_owned())
            .collect()
    }

    fn provider() -> QemuProvider {
        let config = Config {
            ssh_user: Some("vagrant".into()),
            ..Config::default()
        };
        QemuProvider::new(Paths::new("/srv/vmstrap"), config)
    }

    fn scraper() -> VmRequest {
        VmRequest {
            base_image: "ubuntu/bionic64".into(),
            hostname: "tlo-scraper.dev.local.net".into(),
            cpu_count: 2,
            memory_mb: 2048,
        }
    }

    #[test]
    fn public_network_is_bridged_without_forwarding() {
        let provider = provider();
        let cmd = provider
            .qemu_command(&scraper(), &NetworkMode::PublicNetwork)
            .unwrap();
        let args = args_of(&cmd);

        assert!(args.contains(&"bridge,id=net0,br=br0".to_string()));
        assert!(!args.iter().any(|arg| arg.contains("hostfwd")));

        let (_, endpoint) = network_args(
            &provider.config,
            "tlo-scraper.dev.local.net",
            &NetworkMode::PublicNetwork,
        );
        assert_eq!(
            endpoint,
            Some(Endpoint {
                host: "tlo-scraper.dev.local.net".into(),
                port: 22
            })
        );
    }

    #[test]
    fn forwarded_network_maps_host_port_to_ssh() {
        let (args, endpoint) =
            network_args(&Config::default(), "h", &NetworkMode::Forwarded { port: 8080 });
        assert!(args.contains(&"user,hostfwd=tcp::8080-:22".to_string()));
        assert!(!args.iter().any(|arg| arg.starts_with("bridge")));
        assert_eq!(endpoint.unwrap().to_string(), "localhost:8080");
    }

    #[test]
    fn private_network_uses_private_bridge_and_fixed_ip() {
        let ip = Ipv4Addr::new(192, 168, 33, 10);
        let (args, endpoint) =
            network_args(&Config::default(), "h", &NetworkMode::PrivateNetwork { ip });
        assert!(args.contains(&"bridge,id=net0,br=virbr1".to_string()));
        assert_eq!(endpoint.unwrap().to_string(), "192.168.33.10:22");
    }

    #[test]
    fn no_network_leaves_machine_unreachable() {
        let (args, endpoint) = network_args(&Config::default(), "h", &NetworkMode::None);
        assert_eq!(args, ["-nic", "none"]);
        assert!(endpoint.is_none());

        let mut provider = provider();
        let mut vm = VmHandle::new("h");
        match provider.attach_network(&mut vm, &NetworkMode::None) {
            Err(Error::NetworkAttachFailed { reason, .. }) => {
                assert!(reason.contains("cannot reach"))
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(vm.endpoint.is_none());

        let result = provider.run_privileged(
            &VmHandle::new("h"),
            &ProvisionStep::new("noop", "true"),
            None,
        );
        assert!(matches!(result, Err(Error::Unreachable { .. })));
    }

    #[test]
    fn qemu_command_carries_sizing_and_hostname() {
        let cmd = provider()
            .qemu_command(&scraper(), &NetworkMode::PublicNetwork)
            .unwrap();
        assert_eq!(cmd.get_program(), QEMU_RUNNER);

        let args = args_of(&cmd);
        let after = |flag: &str| {
            let pos = args.iter().position(|arg| arg == flag).unwrap();
            args[pos + 1].clone()
        };
        assert_eq!(after("-smp"), "2");
        assert_eq!(after("-m"), "2048M");
        assert_eq!(
            after("-smbios"),
            "type=1,serial=ds=nocloud;h=tlo-scraper.dev.local.net"
        );
        assert_eq!(
            after("-drive"),
            "file=/srv/vmstrap/machines/tlo-scraper.dev.local.net.qcow2,if=none,cache=writethrough,id=hd0"
        );
    }

    #[test]
    fn missing_base_image_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut provider = QemuProvider::new(Paths::new(dir.path()), Config::default());
        match provider.create_vm(&scraper()) {
            Err(Error::ImageNotFound { image, path }) => {
                assert_eq!(image, "ubuntu/bionic64");
                assert!(path.ends_with("images/ubuntu-bionic64.qcow2"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn attach_without_create_is_rejected() {
        let mut provider = provider();
        let mut vm = VmHandle::new("ghost");
        let result = provider.attach_network(&mut vm, &NetworkMode::PublicNetwork);
        assert!(matches!(result, Err(Error::InvalidMachine { .. })));
    }

    #[test]
    fn remote_shell_carries_the_step_deadline() {
        assert_eq!(remote_command(None), ["sudo", "sh", "-s"]);
        assert_eq!(
            remote_command(Some(Duration::from_secs(1800))),
            ["sudo", "timeout", "--kill-after=10", "1800s", "sh", "-s"]
        );
        assert_eq!(
            remote_command(Some(Duration::from_millis(200))),
            ["sudo", "timeout", "--kill-after=10", "1s", "sh", "-s"]
        );
    }

    #[test]
    fn existing_disk_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::new(dir.path());
        paths.setup().unwrap();
        fs::write(paths.image("ubuntu/bionic64"), b"").unwrap();
        fs::write(paths.machine("tlo-scraper.dev.local.net"), b"overlay").unwrap();

        // An empty base image would make qemu-img fail, so success means it never ran.
        let vm = QemuProvider::new(paths.clone(), Config::default())
            .create_vm(&scraper())
            .unwrap();
        assert_eq!(vm, VmHandle::new("tlo-scraper.dev.local.net"));
        assert_eq!(
            fs::read(paths.machine("tlo-scraper.dev.local.net")).unwrap(),
            b"overlay"
        );
    }
}
