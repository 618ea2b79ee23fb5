use std::{process::ExitCode, sync::Arc, thread};

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{debug, error, info, warn};
use signal_hook::{
    consts::signal::{SIGINT, SIGTERM},
    iterator::Signals,
};

use dns01_issuer::{
    aws::AwsContext,
    clock::{CancelToken, ClockT, SystemClock},
    config::{Cli, DnsProviderKind},
    dns::{cloudflare::CloudflareProvider, route53::Route53Provider, DnsProviderT},
    pipeline::Pipeline,
    publish::{acm::AcmCertificateStore, local::LocalDirectory, s3::S3ObjectStore, ObjectStoreT, Publisher},
    transport::{ReqwestTransport, TransportT},
};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            for cause in e.chain().skip(1) {
                debug!("caused by: {}", cause);
            }
            ExitCode::FAILURE
        }
    }
}

/// 第一個 SIGINT/SIGTERM 設定取消旗標，讓進行中的驗證在下一個輪詢邊界停止並清除 DNS 記錄；
/// 第二個訊號直接結束行程。
fn setup_signal_handlers(cancel: CancelToken) -> Result<()> {
    let mut signals =
        Signals::new([SIGTERM, SIGINT]).context("Failed to register signal handlers")?;

    thread::spawn(move || {
        for sig in signals.forever() {
            if cancel.is_cancelled() {
                warn!("Received signal {} again, exiting without cleanup", sig);
                std::process::exit(130);
            }
            info!("Received signal {}, cancelling after the current step", sig);
            cancel.cancel();
        }
    });
    Ok(())
}

/// 只在第一次需要時載入 AWS 設定。
fn aws(slot: &mut Option<Arc<AwsContext>>) -> Result<Arc<AwsContext>> {
    if let Some(context) = slot {
        return Ok(context.clone());
    }
    let context = Arc::new(AwsContext::load().context("Failed to load AWS configuration")?);
    *slot = Some(context.clone());
    Ok(context)
}

fn run(cli: &Cli) -> Result<()> {
    let settings = cli.settings().context("Invalid configuration")?;
    let cancel = CancelToken::new();
    setup_signal_handlers(cancel.clone())?;

    let clock: Arc<dyn ClockT> = Arc::new(SystemClock::new());
    let transport: Arc<dyn TransportT> = Arc::new(
        ReqwestTransport::new(settings.request_timeout).context("Failed to build HTTP client")?,
    );
    let mut aws_context = None;

    let dns: Arc<dyn DnsProviderT> = match cli.dns_provider {
        DnsProviderKind::Route53 => Arc::new(Route53Provider::new(
            aws(&mut aws_context)?,
            clock.clone(),
            cli.route53_hosted_zone_id.clone(),
        )),
        DnsProviderKind::Cloudflare => {
            let token = cli
                .cloudflare_api_token
                .clone()
                .context("CLOUDFLARE_API_TOKEN is required for the cloudflare provider")?;
            Arc::new(CloudflareProvider::new(transport.clone(), token))
        }
    };

    let objects: Arc<dyn ObjectStoreT> = match (&cli.output_dir, &cli.bucket) {
        (Some(dir), _) => Arc::new(LocalDirectory::new(dir)),
        (None, Some(bucket)) => Arc::new(S3ObjectStore::new(aws(&mut aws_context)?, bucket)),
        (None, None) => bail!("Either OUTPUT_DIR or BUCKET_NAME must be set"),
    };
    let mut publisher = Publisher::new(objects);
    if cli.acm_import {
        publisher = publisher.with_certificate_store(
            Arc::new(AcmCertificateStore::new(aws(&mut aws_context)?)),
            cli.acm_cert_arn.clone(),
        );
    }

    let outcome = Pipeline::new(settings, dns, publisher)
        .transport(transport)
        .clock(clock)
        .cancel(cancel)
        .run()?;

    info!("Published {}", outcome.report.stored_keys.join(", "));
    if let Some(arn) = &outcome.report.certificate_arn {
        info!("Certificate available in ACM as {}", arn);
    }
    Ok(())
}
