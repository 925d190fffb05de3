mod config;

use std::process;
use std::sync::Arc;
use std::time::Duration;

use argh::FromArgs;
use futures::future::try_join_all;
use log::info;
use smpc::fields::Mersenne127;
use smpc::party::SmcParty;
use smpc::tpg::TrustedParamGenerator;
use smpc::transport::LocalBoard;
use smpc::MpcField;

/// Field for session evaluation.
type Fp = Mersenne127;

/// Jointly evaluate an arithmetic expression over private party inputs.
#[derive(FromArgs, Debug)]
struct Options {
    /// path to the session description file
    #[argh(option)]
    config: String,

    /// session deadline in seconds
    #[argh(option, default = "30")]
    timeout: u64,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let options: Options = argh::from_env();

    let session = config::load::<Fp>(&options.config).unwrap_or_else(|err| {
        eprintln!("Invalid session config: {err}");
        process::exit(1);
    });

    let tpg = Arc::new(TrustedParamGenerator::new());
    for id in &session.spec.participant_ids {
        tpg.add_participant(id.clone())
            .expect("Participant registration failed");
    }
    tpg.seal();

    let board = LocalBoard::new(tpg);
    let timeout = Duration::from_secs(options.timeout);

    info!(
        "starting session with {} parties and {} multiplications",
        session.spec.participant_ids.len(),
        session.spec.expr.mul_op_ids().len()
    );

    let runs = session
        .spec
        .participant_ids
        .iter()
        .zip(session.inputs.iter().cloned())
        .map(|(id, values)| {
            let id = id.clone();
            let mut party =
                SmcParty::new(session.spec.clone(), values, board.client(id.clone()))
                    .with_timeout(timeout);
            async move {
                let result = party.run().await?;
                info!(
                    "{id}: done ({} bytes in, {} bytes out)",
                    party.bytes_in(),
                    party.bytes_out()
                );
                Ok::<_, smpc::party::PartyError>(result)
            }
        });

    let results = try_join_all(runs).await.unwrap_or_else(|err| {
        eprintln!("Protocol run failed: {err}");
        process::exit(1);
    });

    let first = results[0];
    if results.iter().any(|result| *result != first) {
        eprintln!("Parties disagree on the result");
        process::exit(1);
    }
    println!("Result: {}", first.to_decimal());
}
