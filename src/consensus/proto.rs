tonic::include_proto!("raft");
