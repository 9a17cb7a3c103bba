use std::io::{self, BufRead, Write as _};

use simptcp::SimpTcp;

fn main() {
    env_logger::init();

    let entity = SimpTcp::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let conn = entity.create().unwrap();

    println!(">>> connecting from {} ...", entity.local_addr());
    entity.connect(conn, "127.0.0.1:9090".parse().unwrap()).unwrap();
    println!(">>> connected");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.unwrap();
        if line.is_empty() {
            break;
        }

        entity.send(conn, line.as_bytes()).unwrap();
        let echoed = entity.recv(conn, 1500).unwrap();
        print!(">>> echo: {}\n", String::from_utf8_lossy(&echoed));
        io::stdout().flush().unwrap();
    }

    entity.shutdown(conn).unwrap();
    let _ = entity.close(conn);
}
