use std::net::IpAddr;
use std::rc::Rc;

use hopsim::{
    Action, DeliveryContext, Message, MessageKind, Metadata, NodeId, SimConfig, SimResult,
    Simulation, StaticTopology, Status,
};

const CLIENT: u64 = 1;
const ROUTER: u64 = 2;
const SERVER: u64 = 3;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    println!("═══════════════════════════════════════════════════════");
    println!("  hopsim — Deterministic Message Routing Core");
    println!("  Gateway + Session Routing, Replay Verification Demo");
    println!("═══════════════════════════════════════════════════════");
    println!();

    let config = SimConfig::from_env()?;

    // ── Run 1 and Run 2: same sends, same topology ────────────
    let digest_1 = run_simulation("Run 1", config.clone())?;
    let digest_2 = run_simulation("Run 2", config)?;

    // ── Verify ────────────────────────────────────────────────
    println!("  Verification:");
    println!("    Run 1 trace digest: {:016x}", digest_1);
    println!("    Run 2 trace digest: {:016x}", digest_2);
    if digest_1 == digest_2 {
        println!("    ✓ Traces are IDENTICAL — deterministic replay confirmed.");
    } else {
        println!("    ✗ MISMATCH — determinism violation detected!");
    }
    Ok(())
}

/// client (10.0.0.2) — router (10.0.0.1 | 10.0.1.1) — server (10.0.1.2)
fn build_topology() -> Result<StaticTopology, hopsim::TopologyError> {
    let ip = |s: &str| -> IpAddr { s.parse().unwrap_or(IpAddr::from([0, 0, 0, 0])) };

    let mut t = StaticTopology::new();
    t.add_host(CLIENT)?;
    t.add_router(ROUTER)?;
    t.add_host(SERVER)?;
    t.add_interface(CLIENT, 0, ip("10.0.0.2"), 24)?;
    t.add_interface(ROUTER, 0, ip("10.0.0.1"), 24)?;
    t.add_interface(ROUTER, 1, ip("10.0.1.1"), 24)?;
    t.add_interface(SERVER, 0, ip("10.0.1.2"), 24)?;
    t.connect(CLIENT, 0, ROUTER, 0)?;
    t.connect(ROUTER, 1, SERVER, 0)?;
    Ok(t)
}

/// Routers forward, the server answers, the client prints what came back.
fn network_logic(ctx: &mut DeliveryContext<'_, StaticTopology>, msg: Message) -> SimResult<()> {
    let here = msg.current().node;
    println!("    [{}] {}", ctx.now(), msg);

    if here == NodeId::new(ROUTER) {
        ctx.forward(msg, 1)?;
    } else if here == NodeId::new(SERVER) && msg.kind() == MessageKind::Request {
        let content = msg.as_request().map(|r| format!("{} handled", r.action()));
        let resp = ctx.create_response(&msg, Status::ok(), content, None, None)?;
        ctx.send_message(resp, 2)?;
    }
    Ok(())
}

fn run_simulation(label: &str, config: SimConfig) -> Result<u64, Box<dyn std::error::Error>> {
    println!("  {} (run id {}):", label, config.run_id);

    let mut sim = Simulation::with_config(build_topology()?, config);
    let server_ip: IpAddr = "10.0.1.2".parse()?;

    let messaging = sim.messaging();
    messaging.register_metadata_provider("scan", |action: &Action| {
        Metadata::empty().with_event("icmp").with_attribute("verb", action.verb())
    });

    // Plain gateway routing.
    for i in 0..3 {
        let msg = messaging.create_request(
            CLIENT,
            "scanner",
            server_ip,
            "ssh",
            Action::new("scan:ping").with_parameter("seq", i.to_string()),
            None,
            None,
        );
        messaging.send_message(msg, i * 2)?;
    }

    // The same route, pinned as a session.
    let session = Rc::new(messaging.topology().create_session(
        "scanner",
        &[NodeId::new(CLIENT), NodeId::new(ROUTER), NodeId::new(SERVER)],
        Some("scanner".into()),
        Some("ssh".into()),
        None,
    )?);
    println!("    opened {}", session);
    let msg = messaging.create_request(
        CLIENT,
        "scanner",
        server_ip,
        "ssh",
        Action::new("exec:command"),
        Some(session),
        None,
    );
    messaging.send_message(msg, 1)?;

    // The scanner wakes itself once the replies should be in.
    messaging.schedule_timeout(CLIENT, "scanner", 20, Some("scan window closed".into()))?;

    let processed = sim.run(&mut network_logic)?;

    println!(
        "    {} deliveries, final time {}, state {}",
        processed,
        sim.current_time(),
        sim.state()
    );
    println!();
    Ok(sim.trace().digest())
}
