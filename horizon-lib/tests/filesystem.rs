//! File-system operations against the simulator

mod common;

use common::*;
use horizon_lib::sim::STATUS_NOT_FOUND;

fn contents(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

#[tokio::test]
async fn test_list_dir() {
    let (device, horizon) = connect(SimOptions::default()).await;
    device.insert_file("/lines/a.bin", vec![0; 3]);
    device.insert_file("/config.bin", vec![0; 68]);

    let root = horizon.list_dir("/").await.unwrap();
    assert_eq!(root.len(), 2);
    assert_eq!(root[0].name, "lines");
    assert!(root[0].is_dir());
    assert_eq!(root[1].name, "config.bin");
    assert_eq!(root[1].size, 68);

    assert_eq!(
        horizon.list_dir("/nope").await,
        Err(LinkError::DeviceStatus {
            command: Command::FileListResponse,
            status: STATUS_NOT_FOUND
        })
    );
}

#[tokio::test]
async fn test_file_info() {
    let (device, horizon) = connect(SimOptions::default()).await;
    device.insert_file("/poi/alps.bin", contents(1000));
    let info = horizon.file_info("/poi/alps.bin").await.unwrap();
    assert!(info.exists());
    assert_eq!(info.size, Some(1000));

    let missing = horizon.file_info("/poi/none.bin").await.unwrap();
    assert_eq!(missing.status, STATUS_NOT_FOUND);
    assert_eq!(missing.size, None);
}

#[tokio::test]
async fn test_download_multi_chunk() {
    let (device, horizon) = connect(SimOptions {
        fragment_size: Some(64),
        ..SimOptions::default()
    })
    .await;
    let data = contents(1234);
    device.insert_file("/big.bin", data.clone());
    assert_eq!(horizon.download_file("/big.bin").await.unwrap(), data);

    // info, then 480 + 480 + 274
    let reads = device
        .commands()
        .iter()
        .filter(|c| **c == Command::FileReadRequest)
        .count();
    assert_eq!(reads, 3);
}

#[tokio::test]
async fn test_download_missing_file() {
    let (device, horizon) = connect(SimOptions::default()).await;
    assert_eq!(
        horizon.download_file("/missing").await,
        Err(LinkError::DeviceStatus {
            command: Command::FileInfoResponse,
            status: STATUS_NOT_FOUND
        })
    );
    assert!(!device.commands().contains(&Command::FileReadRequest));
}

#[tokio::test]
async fn test_download_empty_file() {
    let (device, horizon) = connect(SimOptions::default()).await;
    device.insert_file("/empty", Vec::new());
    assert!(horizon.download_file("/empty").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_then_download() {
    let (device, horizon) = connect(SimOptions::default()).await;
    let data = contents(700);
    horizon.upload_file("/up.bin", &data).await.unwrap();
    assert_eq!(device.file("/up.bin"), Some(data.clone()));
    let writes = device
        .commands()
        .iter()
        .filter(|c| **c == Command::FileWriteRequest)
        .count();
    assert_eq!(writes, 3);
    assert_eq!(horizon.download_file("/up.bin").await.unwrap(), data);
}

#[tokio::test]
async fn test_upload_empty_file_sends_one_chunk() {
    let (device, horizon) = connect(SimOptions::default()).await;
    horizon.upload_file("/empty.bin", &[]).await.unwrap();
    assert_eq!(device.file("/empty.bin"), Some(Vec::new()));
}

#[tokio::test]
async fn test_upload_times_out_when_device_silent() {
    let (device, horizon) = connect(SimOptions::default()).await;
    device.silence(Command::FileWriteRequest);
    assert_eq!(
        horizon.upload_file("/x", &contents(600)).await,
        Err(LinkError::Timeout)
    );
    // aborted after the first chunk
    assert_eq!(device.file("/x").map(|f| f.len()), Some(256));
}

#[tokio::test]
async fn test_delete_file() {
    let (device, horizon) = connect(SimOptions::default()).await;
    device.insert_file("/old.bin", vec![1]);
    horizon.delete_file("/old.bin").await.unwrap();
    assert_eq!(device.file("/old.bin"), None);
    assert_eq!(
        horizon.delete_file("/old.bin").await,
        Err(LinkError::DeviceStatus {
            command: Command::FileDeleteResponse,
            status: STATUS_NOT_FOUND
        })
    );
}
