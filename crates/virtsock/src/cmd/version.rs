use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("virtsock {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: virtsock");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "build_target: {}",
        option_env!("VIRTSOCK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "transports: vsock={}, hvsock={}, unix={}",
        cfg!(target_os = "linux"),
        cfg!(any(target_os = "linux", windows)),
        cfg!(unix)
    );
    println!(
        "max_frame_payload: {}",
        virtsock_shutdown::MAX_MSG_SIZE
    );

    Ok(SUCCESS)
}
