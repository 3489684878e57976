use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use inference::{load_imt_net, InferenceBackend};
use models::{ImtNet, ImtNetConfig};
use scan_contracts::default_heads;

#[test]
fn loaded_weights_reproduce_saved_outputs() {
    let device = <InferenceBackend as Backend>::Device::default();
    let cfg = ImtNetConfig {
        base_filters: 4,
        depth: 2,
        hidden: 8,
        ..ImtNetConfig::from_heads(&default_heads(true), 1)
    };
    let model = ImtNet::<InferenceBackend>::new(cfg.clone(), &device);

    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("weights_test.bin");
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(&path, &recorder)
        .expect("save checkpoint");

    let loaded = load_imt_net::<InferenceBackend>(&path, cfg, &device).expect("load checkpoint");

    let input = Tensor::<InferenceBackend, 4>::ones([1, 1, 8, 8], &device);
    let before = model.forward(input.clone());
    let after = loaded.forward(input);
    assert_eq!(before.len(), after.len());
    for (b, a) in before.into_iter().zip(after) {
        let b = b.into_data().to_vec::<f32>().unwrap();
        let a = a.into_data().to_vec::<f32>().unwrap();
        assert_eq!(b, a);
    }
}

#[test]
fn missing_checkpoint_is_an_error() {
    let device = <InferenceBackend as Backend>::Device::default();
    let cfg = ImtNetConfig::from_heads(&default_heads(false), 1);
    let missing = std::path::Path::new("/nonexistent/weights_none.bin");
    assert!(load_imt_net::<InferenceBackend>(missing, cfg, &device).is_err());
}
