use simptcp::SimpTcp;

fn main() {
    env_logger::init();

    let entity = SimpTcp::bind("127.0.0.1:9090".parse().unwrap()).unwrap();

    let listener = entity.create().unwrap();
    entity.listen(listener, 8).unwrap();

    println!(">>> listening on {}", entity.local_addr());

    loop {
        let (conn, remote) = entity.accept(listener).unwrap();
        println!(">>> accepted connection from {remote}");

        loop {
            match entity.recv(conn, 1500) {
                Ok(buf) => {
                    println!(">>> read {} bytes: {:?}", buf.len(), String::from_utf8_lossy(&buf));
                    if entity.send(conn, &buf).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }

        println!(">>> connection from {remote} closed");
        let _ = entity.close(conn);
    }
}
