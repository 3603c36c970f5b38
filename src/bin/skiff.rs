use clap::{Args, Parser, Subcommand};
use skiff::{
    distribution::{
        fetch_token, probe_challenge, Anonymous, BasicCredentials, Client, CredentialStore,
        GetManifestOptions, Scheme,
    },
    Digest, ImageReference,
};
use std::{fs, io, path::PathBuf};

#[derive(Debug, Parser)]
#[clap(name = "skiff", version, about = "A Docker Registry HTTP API client")]
struct Opt {
    /// Use the specified username
    #[clap(short, long, global = true)]
    user: Option<String>,

    /// Use the specified password
    #[clap(short, long, global = true)]
    password: Option<String>,

    /// Use the password found in the specified file
    #[clap(long, global = true, parse(from_os_str))]
    password_file: Option<PathBuf>,

    /// Retry over plain HTTP when HTTPS authentication fails
    #[clap(long, global = true)]
    insecure: bool,

    /// Print HTTP requests
    #[clap(short, long, global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args, Default)]
struct AcceptOpts {
    /// Accept all known manifest types (as new types may be added in the
    /// future, this option does not guarantee backward compatibility)
    #[clap(short = 'a', long)]
    accept_known: bool,

    /// Accept Schema 1 manifests
    #[clap(long)]
    accept_schema1: bool,

    /// Accept Schema 2 manifests
    #[clap(long)]
    accept_schema2: bool,

    /// Accept manifest lists
    #[clap(long)]
    accept_manifest_list: bool,

    /// Accept OCI image manifests
    #[clap(long = "accept-ocischema")]
    accept_oci_schema: bool,

    /// Accept OCI image index
    #[clap(long)]
    accept_oci_index: bool,

    /// Accept manifests with a custom media type
    #[clap(short = 't', long = "accept")]
    media_types: Vec<String>,
}

impl From<AcceptOpts> for GetManifestOptions {
    fn from(opts: AcceptOpts) -> Self {
        GetManifestOptions {
            accept_known: opts.accept_known,
            accept_schema1: opts.accept_schema1,
            accept_schema2: opts.accept_schema2,
            accept_manifest_list: opts.accept_manifest_list,
            accept_oci_schema: opts.accept_oci_schema,
            accept_oci_index: opts.accept_oci_index,
            media_types: opts.media_types,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Get an image manifest and print it as it came from the registry
    GetManifest {
        /// Image reference, `<name>[:<tag>|@<digest>]`
        image: String,

        #[clap(flatten)]
        accept: AcceptOpts,
    },

    /// Put an image manifest from a file
    PutManifest {
        /// Image reference, `<name>[:<tag>|@<digest>]`
        image: String,

        /// Path of the manifest file
        #[clap(parse(from_os_str))]
        file: PathBuf,

        /// Use the specified media type to upload the manifest
        #[clap(
            short = 't',
            long = "content-type",
            default_value = "application/vnd.docker.distribution.manifest.v1+json"
        )]
        media_type: String,
    },

    /// Delete an image manifest
    DeleteManifest {
        /// Image reference, `<name>[:<tag>|@<digest>]`
        image: String,
    },

    /// Get a blob and write it to stdout
    GetBlob {
        /// Image reference naming the repository
        image: String,

        /// Digest of the blob, e.g. `sha256:<hex>`
        digest: String,
    },

    /// Put a blob from a file
    PutBlob {
        /// Image reference naming the repository
        image: String,

        /// Path of the blob file
        #[clap(parse(from_os_str))]
        file: PathBuf,

        /// Digest of the blob; computed from the file if not set
        #[clap(long)]
        digest: Option<String>,
    },

    /// List tags in a repository
    GetTags {
        /// Image reference naming the repository
        image: String,
    },

    /// Get a bearer token for the given scopes
    Token {
        /// Registry hostname
        host: String,

        /// Scopes, e.g. `repository:busybox:pull`
        scopes: Vec<String>,
    },
}

fn credentials(opt: &Opt) -> anyhow::Result<Box<dyn CredentialStore>> {
    let password = match (&opt.password, &opt.password_file) {
        (Some(password), _) => Some(password.clone()),
        (None, Some(path)) => Some(
            fs::read_to_string(path)?
                .trim_end_matches(&['\r', '\n'][..])
                .to_string(),
        ),
        (None, None) => None,
    };
    if opt.user.is_some() || password.is_some() {
        Ok(Box::new(BasicCredentials {
            username: opt.user.clone().unwrap_or_default(),
            password: password.unwrap_or_default(),
        }))
    } else {
        log::debug!("No credentials are found, proceeding as anonymous");
        Ok(Box::new(Anonymous))
    }
}

fn new_client(opt: &Opt, image: &str, actions: &[&str]) -> anyhow::Result<Client> {
    let reference = ImageReference::parse(image)?;
    let mut client = Client::new(reference, opt.insecure);
    client.authenticate(credentials(opt)?, actions)?;
    Ok(client)
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();
    env_logger::Builder::new()
        .filter_level(if opt.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .parse_default_env()
        .init();

    match &opt.command {
        Command::GetManifest { image, accept } => {
            let mut client = new_client(&opt, image, &["pull"])?;
            let name = client.reference().manifest_name();
            let res = client.get_manifest(&name, &accept.clone().into())?;
            if res.status() != 200 {
                let status = format!("{} {}", res.status(), res.status_text());
                io::copy(&mut res.into_reader(), &mut io::stderr())?;
                anyhow::bail!("{}", status);
            }
            io::copy(&mut res.into_reader(), &mut io::stdout())?;
        }

        Command::PutManifest {
            image,
            file,
            media_type,
        } => {
            let manifest = fs::read(file)?;
            let mut client = new_client(&opt, image, &["pull", "push"])?;
            let name = client.reference().manifest_name();
            let digest = client.put_manifest(&name, media_type, &manifest)?;
            println!("{}", digest);
        }

        Command::DeleteManifest { image } => {
            let mut client = new_client(&opt, image, &["pull", "push"])?;
            let name = client.reference().manifest_name();
            let res = client.delete_manifest(&name)?;
            if res.status() / 100 != 2 {
                let status = format!("{} {}", res.status(), res.status_text());
                io::copy(&mut res.into_reader(), &mut io::stderr())?;
                anyhow::bail!("{}", status);
            }
        }

        Command::GetBlob { image, digest } => {
            let digest = Digest::new(digest)?;
            let mut client = new_client(&opt, image, &["pull"])?;
            let res = client.get_blob(&digest)?;
            let status = format!("{} {}", res.status(), res.status_text());
            let ok = res.status() == 200;
            io::copy(&mut res.into_reader(), &mut io::stdout())?;
            if !ok {
                anyhow::bail!("{}", status);
            }
        }

        Command::PutBlob {
            image,
            file,
            digest,
        } => {
            let blob = fs::read(file)?;
            let digest = digest.as_deref().map(Digest::new).transpose()?;
            let mut client = new_client(&opt, image, &["pull", "push"])?;
            let digest = client.put_blob(&blob, digest)?;
            println!("{}", digest);
        }

        Command::GetTags { image } => {
            let mut client = new_client(&opt, image, &["pull"])?;
            for tag in client.get_tags()? {
                println!("{}", tag);
            }
        }

        Command::Token { host, scopes } => {
            let agent = ureq::Agent::new();
            let scheme = if opt.insecure {
                Scheme::Http
            } else {
                Scheme::Https
            };
            let challenge = probe_challenge(&agent, scheme, host)?
                .ok_or_else(|| anyhow::anyhow!("registry requires no authentication"))?;
            anyhow::ensure!(
                challenge.is_bearer(),
                "unexpected challenge scheme: {}",
                challenge.scheme
            );
            let mut creds = credentials(&opt)?;
            let token = fetch_token(&agent, &challenge, creds.as_mut(), scopes)?;
            println!("{}", token.token);
        }
    }
    Ok(())
}
