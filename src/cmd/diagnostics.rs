//! Diagnostics command - host and Docker connectivity information.

use anyhow::Result;
use bollard::Docker;
use sysinfo::System;

pub async fn run() -> Result<()> {
    let mut sys = System::new_all();
    sys.refresh_all();

    println!("== Host ==");
    println!("OS: {}", System::long_os_version().unwrap_or_else(|| "unknown".into()));
    println!("Kernel: {}", System::kernel_version().unwrap_or_else(|| "unknown".into()));
    println!("CPUs: {}", sys.cpus().len());
    println!(
        "Memory: {:.1} GiB total, {:.1} GiB used",
        sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0),
        sys.used_memory() as f64 / (1024.0 * 1024.0 * 1024.0),
    );

    println!("== Docker ==");
    match Docker::connect_with_local_defaults() {
        Ok(docker) => match docker.version().await {
            Ok(version) => {
                println!(
                    "Connected, version {}",
                    version.version.unwrap_or_else(|| "unknown".into())
                );
            }
            Err(e) => println!("Connected but version query failed: {e}"),
        },
        Err(e) => println!("Could not connect to Docker: {e}"),
    }

    Ok(())
}
