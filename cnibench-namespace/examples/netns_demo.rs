//! Network namespace demonstration
//!
//! Run with: cargo run --example netns_demo
//! Run as root: sudo cargo run --example netns_demo

use std::time::Duration;

use cnibench_namespace::{list_links, HostNamespaces, NamespaceOps, ProcessSpawner, UnshareSpawner};

fn main() {
    println!("🔒 cnibench netns demo\n");

    tracing_subscriber::fmt::init();

    // setns only affects the calling thread, so stay on one
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            println!("❌ Failed to build runtime: {e}");
            return;
        }
    };

    runtime.block_on(async {
        demo_current_namespace().await;

        if nix::unistd::geteuid().is_root() {
            println!("\n🔐 Running with root privileges - demonstrating isolation\n");
            demo_isolated_namespace().await;
        } else {
            println!("\n⚠️  Run with sudo to see namespace isolation demos");
        }
    });
}

async fn demo_current_namespace() {
    println!("📊 Current thread namespace:");
    println!("{:-<60}", "");

    match HostNamespaces.current() {
        Ok(handle) => println!("  {} ({})", handle.id(), handle.origin().display()),
        Err(e) => println!("❌ Failed to get namespace: {e}"),
    }

    match list_links().await {
        Ok(links) => {
            for link in links {
                println!("  {link}");
            }
        }
        Err(e) => println!("❌ Failed to list links: {e}"),
    }
}

async fn demo_isolated_namespace() {
    let spawner = match UnshareSpawner::new(
        vec!["sleep".to_string(), "30".to_string()],
        Duration::from_millis(500),
    ) {
        Ok(spawner) => spawner,
        Err(e) => {
            println!("❌ {e}");
            return;
        }
    };

    let mut process = match spawner.spawn().await {
        Ok(process) => process,
        Err(e) => {
            println!("❌ Spawn failed: {e}");
            return;
        }
    };
    println!("✅ Anchor process {} started", process.pid());

    match (HostNamespaces.current(), HostNamespaces.from_process(process.pid())) {
        (Ok(original), Ok(target)) => {
            println!("  original {} -> isolated {}", original.id(), target.id());

            if let Err(e) = HostNamespaces.activate(&target) {
                println!("❌ Switch failed: {e}");
            } else {
                match list_links().await {
                    Ok(links) => {
                        for link in links {
                            println!("  inside: {link}");
                        }
                    }
                    Err(e) => println!("❌ Failed to list links: {e}"),
                }

                if let Err(e) = HostNamespaces.activate(&original) {
                    println!("❌ Restore failed: {e}");
                }
            }
        }
        (Err(e), _) | (_, Err(e)) => println!("❌ {e}"),
    }

    match process.terminate().await {
        Ok(()) => println!("✅ Anchor process terminated"),
        Err(e) => println!("❌ Terminate failed: {e}"),
    }
}
