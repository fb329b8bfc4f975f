//! Guest run-script rendering.
//!
//! The guest side of the signal contract is a bash script executed after boot. It
//! brings the function container up, pins it, runs the instrumented test client and
//! tears everything down, announcing each step with `m5 fail <code>`. This module
//! renders that script from the experiment configuration:
//! 1. **Single node:** one `run.sh` that does everything on the system under test.
//! 2. **Dual node:** `run.sh` for the system under test (network, container, pin) and
//!    `run_drive.sh` for the driving node, which runs the client over the link.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::common::OrchestratorError;
use crate::config::{Config, Topology};
use crate::signal::GuestCode;

/// Script run on the system under test.
pub const RUN_SCRIPT: &str = "run.sh";

/// Script run on the driving node.
pub const DRIVE_SCRIPT: &str = "run_drive.sh";

/// Rendered scripts of a dual-node experiment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DualScripts {
    /// System under test.
    pub test: String,
    /// Driving node.
    pub drive: String,
}

fn marker(code: GuestCode) -> String {
    format!("m5 fail {} ## {code}", code.code())
}

/// Instrumented client invocations: counted warm-up plus measured ones.
///
/// Uninstrumented functional warming is requested separately with `-w`.
pub fn client_invocations(config: &Config) -> u64 {
    let exp = &config.experiment;
    (exp.warm_invocations.max(0) + exp.measure_invocations.max(0)) as u64
}

fn client_block(config: &Config, url: &str) -> String {
    let g = &config.guest;
    format!(
        r"{start}

## The client performs functional warming first, then the instrumented invocations.
{client} \
    -function-name {function} \
    -url {url} \
    -port {port} \
    -n {n} \
    -w {w} \
    -m5ops \
    -input {input}

{stop}",
        start = marker(GuestCode::ClientStarted),
        client = g.client,
        function = config.experiment.workload,
        port = g.port,
        n = client_invocations(config),
        w = g.functional_warm_requests,
        input = g.input,
        stop = marker(GuestCode::ClientStopped),
    )
}

/// Renders the single-node `run.sh`.
pub fn render_run_script(config: &Config) -> String {
    let g = &config.guest;
    let function = &config.experiment.workload;
    format!(
        r#"#!/bin/bash

# 'm5 fail <code>' tells the orchestrator where in the workflow the guest is.

{boot}

## Spin up container
echo "Start the container..."
docker-compose -f {compose} up -d {function}
{started}

echo "Pin function container to core {pin}"
docker update {container} --cpuset-cpus {pin}

sleep {settle}
{pinned}

{client}

## Stop container
docker-compose -f {compose} down
{stopped}

## Exits the simulation
{done}
"#,
        boot = marker(GuestCode::BootComplete),
        compose = g.compose_file,
        started = marker(GuestCode::ContainerStarted),
        pin = g.pin_core,
        container = g.container,
        settle = g.settle_secs,
        pinned = marker(GuestCode::ContainerPinned),
        client = client_block(config, &g.url),
        stopped = marker(GuestCode::ContainerStopped),
        done = marker(GuestCode::TestDone),
    )
}

/// Renders the test-node and drive-node scripts of a dual-node experiment.
pub fn render_dual_scripts(config: &Config) -> DualScripts {
    let g = &config.guest;
    let function = &config.experiment.workload;
    let test = format!(
        r#"#!/bin/bash

{boot}

## Configure network interface
echo "Config: {device} with ipaddress {test_ip}"
ifconfig {device} {test_ip}

## Spin up container
echo "Start the container..."
docker-compose -f {compose} up -d {function}
{started}

echo "Pin function container to core {pin}"
docker update {container} --cpuset-cpus {pin}

sleep {settle}
{pinned}

echo "Container is running. Turn on network IF {device}"
ifconfig {device} up
"#,
        boot = marker(GuestCode::BootComplete),
        device = g.device,
        test_ip = g.test_ip,
        compose = g.compose_file,
        started = marker(GuestCode::ContainerStarted),
        pin = g.pin_core,
        container = g.container,
        settle = g.settle_secs,
        pinned = marker(GuestCode::ContainerPinned),
    );
    let drive = format!(
        r#"#!/bin/bash

echo "Boot complete"
m5 exit

## Configure network interface
echo "Config: {device} with ipaddress {drive_ip}"
ifconfig {device} {drive_ip}
ifconfig {device} up

{client}

## Exits the simulation
{done}
"#,
        device = g.device,
        drive_ip = g.drive_ip,
        client = client_block(config, &g.test_ip),
        done = marker(GuestCode::TestDone),
    );
    DualScripts { test, drive }
}

/// Writes the script(s) for `config` into `dir`.
///
/// # Returns
///
/// Paths written: `run.sh`, plus `run_drive.sh` for dual-node topologies.
///
/// # Errors
///
/// [`OrchestratorError::Io`] when `dir` or a script cannot be written.
pub fn write_run_script(dir: &Path, config: &Config) -> Result<Vec<PathBuf>, OrchestratorError> {
    fs::create_dir_all(dir).map_err(|source| OrchestratorError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let files = match config.topology {
        Topology::Single => vec![(RUN_SCRIPT, render_run_script(config))],
        Topology::Dual => {
            let scripts = render_dual_scripts(config);
            vec![(RUN_SCRIPT, scripts.test), (DRIVE_SCRIPT, scripts.drive)]
        }
    };

    let mut written = Vec::with_capacity(files.len());
    for (name, text) in files {
        let path = dir.join(name);
        fs::write(&path, text).map_err(|source| OrchestratorError::Io {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), "run-script written");
        written.push(path);
    }
    Ok(written)
}
